//! Error types for the IB-200 control protocol.

use thiserror::Error;

/// Which PLL divider a range violation refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Divider {
    /// Reference divider (R), 9 bits.
    Reference,
    /// Integer divider (N).
    Integer,
}

impl std::fmt::Display for Divider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Divider::Reference => write!(f, "R"),
            Divider::Integer => write!(f, "N"),
        }
    }
}

/// Protocol-level errors. Everything here is detected before a byte
/// reaches the wire.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Command payload does not fit in a 13-byte frame.
    #[error("Payload too long: {len} bytes (max: {max})")]
    PayloadTooLong { len: usize, max: usize },

    /// A register bit-field value does not fit its field.
    #[error("Field '{field}' out of range: {value} (max: {max})")]
    FieldOutOfRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    /// A PLL divider is outside the range the MAX2163 accepts.
    #[error("{divider}-divider out of range: {value} (legal: {min}..={max})")]
    DividerOutOfRange {
        divider: Divider,
        value: i64,
        min: u16,
        max: u16,
    },

    /// The requested frequency cannot be synthesised at all.
    #[error("Unsupported frequency: {0} MHz")]
    UnsupportedFrequency(i32),

    /// A buffer handed to the frame parser is not exactly one frame long.
    #[error("Invalid frame length: {0} bytes (expected: 13)")]
    InvalidFrameLength(usize),

    /// Address does not name a MAX2163 register.
    #[error("Unknown register: 0x{0:02X}")]
    UnknownRegister(u8),

    /// The firmware signature was not found in the driver image.
    #[error("Firmware signature not found in driver image")]
    FirmwareSignatureNotFound,

    /// Firmware image has the wrong size.
    #[error("Invalid firmware length: {actual} bytes (expected: {expected})")]
    InvalidFirmwareLength { expected: usize, actual: usize },
}

impl ProtocolError {
    /// Returns true for malformed arguments: oversized payloads, bad field
    /// values and dividers the tuner cannot be programmed with.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            ProtocolError::PayloadTooLong { .. }
                | ProtocolError::FieldOutOfRange { .. }
                | ProtocolError::DividerOutOfRange { .. }
                | ProtocolError::InvalidFrameLength(_)
                | ProtocolError::UnknownRegister(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

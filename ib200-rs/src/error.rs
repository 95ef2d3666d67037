//! Error types for the IB-200 driver.

use thiserror::Error;

use ib200_protocol::ProtocolError;

use crate::bringup::BringupStep;

/// Failures at the USB layer.
///
/// None of these are retried: after a failed transfer the register state
/// of the device is unknown.
#[derive(Error, Debug)]
pub enum TransportError {
    /// libusb reported an error.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// The device accepted fewer bytes than were sent, or returned fewer
    /// than requested.
    #[error("Short transfer: {actual} of {expected} bytes")]
    ShortTransfer { expected: usize, actual: usize },

    /// A control transfer did not complete within its timeout.
    #[error("Transfer timed out")]
    Timeout,

    /// An isochronous transfer could not be allocated or submitted.
    #[error("Isochronous submission failed: {0}")]
    Submit(String),
}

impl TransportError {
    /// Map libusb's timeout onto [`TransportError::Timeout`].
    pub fn from_usb(e: rusb::Error) -> Self {
        match e {
            rusb::Error::Timeout => TransportError::Timeout,
            other => TransportError::Usb(other),
        }
    }
}

/// Device-level errors.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed frame, register field or divider.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The caller broke an ordering rule of the control protocol.
    #[error("Protocol assumption violated: {0}")]
    ProtocolAssumptionViolation(&'static str),

    /// A bring-up step failed. The session has to be reopened.
    #[error("Bring-up failed at {step}: {source}")]
    Bringup {
        step: BringupStep,
        #[source]
        source: Box<DeviceError>,
    },

    /// A previous bring-up failure left the device in an unknown state.
    #[error("Session is unusable, close and reopen the device")]
    SessionUnusable,

    /// Operation not allowed in the current session state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Device {vendor_id:04x}:{product_id:04x} not found")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl DeviceError {
    /// Returns true for errors of the InvalidArgument family.
    pub fn is_invalid_argument(&self) -> bool {
        match self {
            DeviceError::Protocol(e) => e.is_invalid_argument(),
            DeviceError::Bringup { source, .. } => source.is_invalid_argument(),
            _ => false,
        }
    }

    /// Returns true if the error came out of the USB layer.
    pub fn is_transport(&self) -> bool {
        match self {
            DeviceError::Transport(_) => true,
            DeviceError::Bringup { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}

impl From<rusb::Error> for DeviceError {
    fn from(e: rusb::Error) -> Self {
        DeviceError::Transport(TransportError::from_usb(e))
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

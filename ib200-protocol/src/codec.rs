//! Codec for the fixed-size control-channel command frame.
//!
//! Frame format:
//! ```text
//! +----------+----------+----------+----------------------+---------+
//! | Selector | Address  | Endpoint |       Payload        | Trailer |
//! |   u8     |  u16 BE  |    u8    | zero padded, <= 8 B  |   u8    |
//! +----------+----------+----------+----------------------+---------+
//! | 1 byte   | 2 bytes  | 1 byte   |       8 bytes        | 1 byte  |
//! ```

use bytes::{Buf, BufMut};

use crate::error::{ProtocolError, Result};
use crate::types::{
    Trailer, VendorCommand, CHANNEL_SELECTOR, FIRMWARE_UPLOAD_ADDRESS, I2C_BRIDGE_ADDRESS,
    SHADOW_ADDRESS, SUB_TARGET,
};

/// Length of every command frame.
pub const FRAME_SIZE: usize = 13;

/// Maximum payload carried by one frame.
pub const MAX_PAYLOAD: usize = 8;

/// Offset of the first payload byte.
const PAYLOAD_OFFSET: usize = 4;

/// MAX2163 I2C write address as the bridge expects it in the payload.
pub const MAX2163_I2C_WRITE_ADDR: u8 = 0xc0;

/// A 13-byte control-channel command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame([u8; FRAME_SIZE]);

impl CommandFrame {
    /// Decode a raw buffer. Only exact 13-byte buffers are frames.
    pub fn parse(raw: &[u8]) -> Result<Self> {
        if raw.len() != FRAME_SIZE {
            return Err(ProtocolError::InvalidFrameLength(raw.len()));
        }
        let mut bytes = [0u8; FRAME_SIZE];
        bytes.copy_from_slice(raw);
        Ok(Self(bytes))
    }

    pub fn selector(&self) -> u8 {
        self.0[0]
    }

    pub fn address(&self) -> u16 {
        (&self.0[1..3]).get_u16()
    }

    pub fn endpoint(&self) -> u8 {
        self.0[3]
    }

    /// All eight payload bytes, including zero padding.
    pub fn payload(&self) -> &[u8] {
        &self.0[PAYLOAD_OFFSET..PAYLOAD_OFFSET + MAX_PAYLOAD]
    }

    pub fn trailer(&self) -> Trailer {
        Trailer(self.0[FRAME_SIZE - 1])
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_SIZE] {
        &self.0
    }
}

impl AsRef<[u8]> for CommandFrame {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Build a command frame. Unused payload bytes are zero.
pub fn build_command(
    selector: u8,
    address: u16,
    endpoint: u8,
    payload: &[u8],
    trailer: Trailer,
) -> Result<CommandFrame> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLong {
            len: payload.len(),
            max: MAX_PAYLOAD,
        });
    }

    let mut padded = [0u8; MAX_PAYLOAD];
    padded[..payload.len()].copy_from_slice(payload);
    Ok(assemble(selector, address, endpoint, &padded, trailer))
}

fn assemble(
    selector: u8,
    address: u16,
    endpoint: u8,
    payload: &[u8; MAX_PAYLOAD],
    trailer: Trailer,
) -> CommandFrame {
    let mut bytes = [0u8; FRAME_SIZE];
    {
        let mut buf = &mut bytes[..];
        buf.put_u8(selector);
        buf.put_u16(address);
        buf.put_u8(endpoint);
        buf.put_slice(payload);
        buf.put_u8(trailer.0);
    }
    CommandFrame(bytes)
}

/// Frame for a captured vendor command.
pub fn encode_vendor_command(cmd: &VendorCommand) -> CommandFrame {
    encode_endpoint_write(cmd.address, &cmd.data, cmd.trailer)
}

/// Frame for a generic eight-byte vendor write.
pub fn encode_endpoint_write(
    address: u16,
    data: &[u8; MAX_PAYLOAD],
    trailer: Trailer,
) -> CommandFrame {
    assemble(CHANNEL_SELECTOR, address, SUB_TARGET, data, trailer)
}

/// Frame writing one MAX2163 register through the I2C bridge.
pub fn encode_i2c_write(register: u8, value: u8, trailer: Trailer) -> CommandFrame {
    let payload = [MAX2163_I2C_WRITE_ADDR, register, value, 0, 0, 0, 0, 0];
    encode_endpoint_write(I2C_BRIDGE_ADDRESS, &payload, trailer)
}

/// Frame mirroring a register/trailer pair into the shadow space.
pub fn encode_shadow_write(register: u8, trailer: Trailer) -> CommandFrame {
    let payload = [register, 0, 0, 0, 0, 0, 0, 0];
    encode_endpoint_write(SHADOW_ADDRESS, &payload, trailer)
}

/// Frame carrying one two-byte firmware chunk.
pub fn encode_firmware_chunk(chunk: [u8; 2]) -> CommandFrame {
    let payload = [chunk[0], chunk[1], 0, 0, 0, 0, 0, 0];
    encode_endpoint_write(FIRMWARE_UPLOAD_ADDRESS, &payload, Trailer::FIRMWARE)
}

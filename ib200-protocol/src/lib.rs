//! Control protocol definitions for the Zinwell IB-200 ISDB-T 1seg tuner.
//!
//! The device is driven entirely through vendor control transfers carrying a
//! fixed 13-byte command frame. Tuner registers of the MAX2163 behind the
//! on-board I2C bridge are written through the same frames.
//!
//! # Frame Format
//!
//! ```text
//! +----------+----------+----------+----------------------+---------+
//! | Selector | Address  | Endpoint |       Payload        | Trailer |
//! |   0x0B   |  u16 BE  |   0x82   | zero padded, <= 8 B  |   u8    |
//! +----------+----------+----------+----------------------+---------+
//! | 1 byte   | 2 bytes  | 1 byte   |       8 bytes        | 1 byte  |
//! ```
//!
//! # Example
//!
//! ```rust
//! use ib200_protocol::{encode_i2c_write, frequency_to_dividers, Register};
//!
//! let pll = frequency_to_dividers(491, 0x70).unwrap();
//! assert_eq!(pll.dividers.n(), 1720);
//!
//! let trailer = Register::NDividerMsb.trailer().unwrap();
//! let frame = encode_i2c_write(Register::NDividerMsb.address(), pll.dividers.n_msb(), trailer);
//! assert_eq!(frame.as_bytes().len(), 13);
//! ```

pub mod codec;
pub mod error;
pub mod firmware;
pub mod max2163;
pub mod types;

pub use codec::{
    build_command, encode_endpoint_write, encode_firmware_chunk, encode_i2c_write,
    encode_shadow_write, encode_vendor_command, CommandFrame, FRAME_SIZE, MAX_PAYLOAD,
};
pub use error::{Divider, ProtocolError};
pub use firmware::{Firmware, FIRMWARE_CHUNKS, FIRMWARE_SIZE};
pub use max2163::{
    band_for_frequency, frequency_to_dividers, pack_register, unpack_register, DividerPair,
    FilterBand, PllSetting, Register, RegisterSetting, Status, TunerProfile,
};
pub use types::{
    frequency_for_channel, is_known_frequency, physical_channel, BringupVariant, ControlRequest,
    ProbeWrite, Trailer, VendorCommand, FREQUENCY_TABLE,
};

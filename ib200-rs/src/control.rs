//! Vendor control channel.
//!
//! Every operation is one control transfer followed by the settle delay the
//! device needs before it accepts the next command. Operations never retry.

use std::time::Duration;

use log::trace;

use ib200_protocol::codec::{
    encode_endpoint_write, encode_firmware_chunk, encode_i2c_write, encode_shadow_write,
    CommandFrame, MAX_PAYLOAD,
};
use ib200_protocol::types::{PROBE_LENGTH, SETTLE_DELAY_MS};
use ib200_protocol::{
    pack_register, ControlRequest, ProtocolError, Register, RegisterSetting, Trailer,
    VendorCommand,
};

use crate::error::{DeviceError, Result, TransportError};
use crate::transport::UsbTransport;

/// Owns the transport and serialises every command sent over it.
pub struct ControlChannel<T: UsbTransport> {
    transport: T,
    settle: Duration,
    /// Register addressed by the immediately preceding I2C write. The bridge
    /// answers reads from whatever register was last written.
    read_target: Option<Register>,
}

impl<T: UsbTransport> ControlChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            settle: Duration::from_millis(SETTLE_DELAY_MS),
            read_target: None,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_transport(self) -> T {
        self.transport
    }

    fn settle(&self) {
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
    }

    fn send(&mut self, frame: &CommandFrame) -> Result<()> {
        self.read_target = None;
        trace!("control out: {}", hex(frame.as_ref()));
        self.transport.control_out(ControlRequest::command_out(), frame.as_ref())?;
        self.settle();
        Ok(())
    }

    /// Generic vendor write to `address`.
    pub fn endpoint_write(
        &mut self,
        address: u16,
        data: &[u8; MAX_PAYLOAD],
        trailer: Trailer,
    ) -> Result<()> {
        self.send(&encode_endpoint_write(address, data, trailer))
    }

    /// Replay a captured vendor command.
    pub fn vendor_command(&mut self, command: &VendorCommand) -> Result<()> {
        self.endpoint_write(command.address, &command.data, command.trailer)
    }

    /// Write one tuner register through the I2C bridge.
    pub fn i2c_write(&mut self, register: Register, value: u8, trailer: Trailer) -> Result<()> {
        self.send(&encode_i2c_write(register.address(), value, trailer))?;
        self.read_target = Some(register);
        Ok(())
    }

    /// Mirror a register/trailer pair into the shadow address space.
    pub fn shadow_write(&mut self, register: Register, trailer: Trailer) -> Result<()> {
        self.send(&encode_shadow_write(register.address(), trailer))
    }

    /// Upload one two-byte firmware chunk.
    pub fn firmware_chunk(&mut self, chunk: [u8; 2]) -> Result<()> {
        self.send(&encode_firmware_chunk(chunk))
    }

    /// Read back the register addressed by the preceding I2C write.
    fn i2c_read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let target = self
            .read_target
            .take()
            .ok_or(DeviceError::ProtocolAssumptionViolation(
                "I2C read without a preceding I2C write",
            ))?;
        let n = self.transport.control_in(ControlRequest::command_in(), buf)?;
        trace!("control in ({}): {}", target, hex(&buf[..n]));
        self.settle();
        Ok(n)
    }

    /// Address `register` with a write of `value`, then read it back into
    /// `buf`. Returns the number of bytes read.
    pub fn write_then_read(
        &mut self,
        register: Register,
        value: u8,
        trailer: Trailer,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.i2c_write(register, value, trailer)?;
        self.i2c_read(buf)
    }

    /// Pack a typed register value and write it, optionally followed by the
    /// matching shadow write.
    pub fn program_register(&mut self, setting: &RegisterSetting, shadow: bool) -> Result<u8> {
        let (register, byte) = pack_register(setting)?;
        let trailer = register
            .trailer()
            .ok_or(ProtocolError::UnknownRegister(register.address()))?;
        self.i2c_write(register, byte, trailer)?;
        if shadow {
            self.shadow_write(register, trailer)?;
        }
        Ok(byte)
    }

    /// Configuration probe. The reply is opaque and only logged.
    pub fn probe(&mut self) -> Result<[u8; PROBE_LENGTH]> {
        self.read_target = None;
        let mut reply = [0u8; PROBE_LENGTH];
        let n = self.transport.control_in(ControlRequest::probe(), &mut reply)?;
        if n != PROBE_LENGTH {
            return Err(TransportError::ShortTransfer {
                expected: PROBE_LENGTH,
                actual: n,
            }
            .into());
        }
        trace!("probe: {}", hex(&reply));
        self.settle();
        Ok(reply)
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

//! USB transport capability.
//!
//! Everything above this layer talks to the device through [`UsbTransport`],
//! which keeps the control and streaming logic independent of libusb.

use ib200_protocol::ControlRequest;

use crate::error::TransportError;

#[cfg(test)]
pub(crate) mod mock;
pub mod usb;

pub use usb::{open_device, UsbDeviceTransport};

/// Outcome of a whole transfer or of one micro-packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Completed,
    Error,
    TimedOut,
    Cancelled,
    Stall,
    NoDevice,
    Overflow,
}

impl TransferStatus {
    pub fn is_ok(self) -> bool {
        self == TransferStatus::Completed
    }
}

/// One micro-packet descriptor of a finished isochronous transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoPacket {
    /// Requested length.
    pub length: usize,
    /// Bytes actually received.
    pub actual_length: usize,
    pub status: TransferStatus,
}

/// Parameters of one isochronous submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoRequest {
    pub endpoint: u8,
    pub packet_size: usize,
    pub packet_count: usize,
    pub timeout_ms: u32,
}

impl IsoRequest {
    pub fn buffer_len(&self) -> usize {
        self.packet_size * self.packet_count
    }
}

/// A finished isochronous transfer.
///
/// Micro-packets sit back to back in `buffer`, each at a stride of the
/// requested packet size.
#[derive(Debug)]
pub struct IsoCompletion {
    pub status: TransferStatus,
    pub buffer: Vec<u8>,
    pub packets: Vec<IsoPacket>,
}

impl IsoCompletion {
    /// Payload of every micro-packet that carried data, in order.
    pub fn payloads(&self) -> impl Iterator<Item = &[u8]> + '_ {
        let mut offset = 0;
        self.packets.iter().filter_map(move |p| {
            let start = offset;
            offset += p.length;
            if !p.status.is_ok() || p.actual_length == 0 {
                return None;
            }
            let end = (start + p.actual_length).min(self.buffer.len());
            self.buffer.get(start..end)
        })
    }
}

/// Callback run on the transport's completion thread.
pub type IsoCallback = Box<dyn FnOnce(IsoCompletion) + Send + 'static>;

pub trait UsbTransport: Send + Sync {
    /// Host-to-device vendor control transfer.
    fn control_out(&self, request: ControlRequest, data: &[u8]) -> Result<usize, TransportError>;

    /// Device-to-host vendor control transfer.
    fn control_in(&self, request: ControlRequest, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn set_configuration(&mut self, configuration: u8) -> Result<(), TransportError>;

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    fn release_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> Result<(), TransportError>;

    /// Largest isochronous packet the endpoint accepts in the active
    /// alternate setting.
    fn max_iso_packet_size(&self, endpoint: u8) -> Result<usize, TransportError>;

    /// Submit an isochronous IN transfer. Returns as soon as the transfer is
    /// queued; `on_complete` runs exactly once when it retires.
    fn submit_iso(
        &self,
        request: IsoRequest,
        on_complete: IsoCallback,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(length: usize, actual_length: usize, status: TransferStatus) -> IsoPacket {
        IsoPacket {
            length,
            actual_length,
            status,
        }
    }

    #[test]
    fn test_payloads_skip_empty_and_failed_packets() {
        let mut buffer = vec![0u8; 30];
        buffer[10..14].copy_from_slice(&[1, 2, 3, 4]);
        buffer[20..22].copy_from_slice(&[5, 6]);
        let completion = IsoCompletion {
            status: TransferStatus::Completed,
            buffer,
            packets: vec![
                packet(10, 0, TransferStatus::Completed),
                packet(10, 4, TransferStatus::Completed),
                packet(10, 2, TransferStatus::Completed),
            ],
        };
        let chunks: Vec<&[u8]> = completion.payloads().collect();
        assert_eq!(chunks, vec![&[1u8, 2, 3, 4][..], &[5u8, 6][..]]);

        let failed = IsoCompletion {
            status: TransferStatus::Completed,
            buffer: vec![9u8; 20],
            packets: vec![
                packet(10, 10, TransferStatus::Error),
                packet(10, 10, TransferStatus::Completed),
            ],
        };
        assert_eq!(failed.payloads().map(|p| p.len()).sum::<usize>(), 10);
    }
}

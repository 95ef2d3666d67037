//! libusb-backed transport.
//!
//! Control transfers go through the synchronous `rusb` API. rusb has no safe
//! isochronous interface, so streaming drops down to `rusb::ffi` and runs a
//! dedicated event thread that delivers completions.

use std::os::raw::{c_int, c_uint, c_void};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, trace};
use rusb::{ffi, Context, DeviceHandle, UsbContext};

use ib200_protocol::types::CONTROL_TIMEOUT_MS;
use ib200_protocol::ControlRequest;

use super::{IsoCallback, IsoCompletion, IsoPacket, IsoRequest, TransferStatus, UsbTransport};
use crate::error::{DeviceError, TransportError};

/// How long the event thread blocks in libusb before checking for shutdown.
const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// An opened IB-200.
pub struct UsbDeviceTransport {
    context: Context,
    handle: DeviceHandle<Context>,
    running: Arc<AtomicBool>,
    event_thread: Option<JoinHandle<()>>,
}

/// Find the first device matching `vendor_id:product_id` and open it.
pub fn open_device(vendor_id: u16, product_id: u16) -> Result<UsbDeviceTransport, DeviceError> {
    let context = Context::new()?;
    let devices = context.devices()?;

    let device = devices
        .iter()
        .find(|d| {
            d.device_descriptor()
                .map(|desc| desc.vendor_id() == vendor_id && desc.product_id() == product_id)
                .unwrap_or(false)
        })
        .ok_or(DeviceError::DeviceNotFound {
            vendor_id,
            product_id,
        })?;

    info!(
        "Found {:04x}:{:04x} on bus {:03} address {:03}",
        vendor_id,
        product_id,
        device.bus_number(),
        device.address()
    );

    let mut handle = device.open()?;
    // Not supported on every platform.
    if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
        debug!("Kernel driver auto-detach unavailable: {}", e);
    }

    Ok(UsbDeviceTransport::new(context, handle))
}

impl UsbDeviceTransport {
    pub fn new(context: Context, handle: DeviceHandle<Context>) -> Self {
        let running = Arc::new(AtomicBool::new(true));
        let event_thread = {
            let context = context.clone();
            let running = running.clone();
            std::thread::Builder::new()
                .name("ib200-usb-events".to_string())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        if let Err(e) = context.handle_events(Some(EVENT_POLL_INTERVAL)) {
                            match e {
                                rusb::Error::Interrupted => continue,
                                e => {
                                    error!("USB event loop failed: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                    debug!("USB event thread stopped");
                })
                .map_err(|e| error!("Failed to spawn USB event thread: {}", e))
                .ok()
        };

        Self {
            context,
            handle,
            running,
            event_thread,
        }
    }

    fn timeout() -> Duration {
        Duration::from_millis(CONTROL_TIMEOUT_MS)
    }
}

impl Drop for UsbDeviceTransport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(t) = self.event_thread.take() {
            // Wake the thread if it is parked inside libusb.
            self.context.interrupt_handle_events();
            let _ = t.join();
        }
    }
}

impl UsbTransport for UsbDeviceTransport {
    fn control_out(&self, request: ControlRequest, data: &[u8]) -> Result<usize, TransportError> {
        let written = self
            .handle
            .write_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                data,
                Self::timeout(),
            )
            .map_err(TransportError::from_usb)?;
        if written != data.len() {
            return Err(TransportError::ShortTransfer {
                expected: data.len(),
                actual: written,
            });
        }
        Ok(written)
    }

    fn control_in(&self, request: ControlRequest, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.handle
            .read_control(
                request.request_type,
                request.request,
                request.value,
                request.index,
                buf,
                Self::timeout(),
            )
            .map_err(TransportError::from_usb)
    }

    fn set_configuration(&mut self, configuration: u8) -> Result<(), TransportError> {
        self.handle
            .set_active_configuration(configuration)
            .map_err(TransportError::from_usb)
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        self.handle
            .claim_interface(interface)
            .map_err(TransportError::from_usb)
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        self.handle
            .release_interface(interface)
            .map_err(TransportError::from_usb)
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> Result<(), TransportError> {
        self.handle
            .set_alternate_setting(interface, setting)
            .map_err(TransportError::from_usb)
    }

    fn max_iso_packet_size(&self, endpoint: u8) -> Result<usize, TransportError> {
        let device = self.handle.device();
        // SAFETY: the device pointer is owned by `device` and outlives the call.
        let size = unsafe { ffi::libusb_get_max_iso_packet_size(device.as_raw(), endpoint) };
        if size < 0 {
            return Err(libusb_error(size));
        }
        Ok(size as usize)
    }

    fn submit_iso(
        &self,
        request: IsoRequest,
        on_complete: IsoCallback,
    ) -> Result<(), TransportError> {
        let packet_count = request.packet_count as c_int;
        let mut in_flight = Box::new(InFlight {
            buffer: vec![0u8; request.buffer_len()],
            packet_size: request.packet_size,
            on_complete: Some(on_complete),
        });

        // SAFETY: the transfer and the boxed state are handed to libusb
        // together and reclaimed together in `iso_transfer_done`, or right
        // here if submission fails.
        unsafe {
            let transfer = ffi::libusb_alloc_transfer(packet_count);
            if transfer.is_null() {
                return Err(TransportError::Submit("libusb_alloc_transfer failed".to_string()));
            }

            let buffer = in_flight.buffer.as_mut_ptr();
            let length = in_flight.buffer.len() as c_int;
            let user_data = Box::into_raw(in_flight) as *mut c_void;

            ffi::libusb_fill_iso_transfer(
                transfer,
                self.handle.as_raw(),
                request.endpoint,
                buffer,
                length,
                packet_count,
                iso_transfer_done,
                user_data,
                request.timeout_ms as c_uint,
            );
            ffi::libusb_set_iso_packet_lengths(transfer, request.packet_size as c_uint);

            let rc = ffi::libusb_submit_transfer(transfer);
            if rc != 0 {
                drop(Box::from_raw(user_data as *mut InFlight));
                ffi::libusb_free_transfer(transfer);
                return Err(libusb_error(rc));
            }
        }

        trace!(
            "Submitted iso transfer: ep=0x{:02x} {}x{} bytes",
            request.endpoint,
            request.packet_count,
            request.packet_size
        );
        Ok(())
    }
}

/// State owned by libusb while a transfer is in flight.
struct InFlight {
    buffer: Vec<u8>,
    packet_size: usize,
    on_complete: Option<IsoCallback>,
}

extern "system" fn iso_transfer_done(transfer: *mut ffi::libusb_transfer) {
    // SAFETY: libusb calls this exactly once per submitted transfer, with the
    // `user_data` installed by `submit_iso`.
    let (mut in_flight, status, packets) = unsafe {
        let t = &*transfer;
        let in_flight = Box::from_raw(t.user_data as *mut InFlight);
        let descriptors = std::slice::from_raw_parts(
            t.iso_packet_desc.as_ptr(),
            t.num_iso_packets.max(0) as usize,
        );
        let packets: Vec<IsoPacket> = descriptors
            .iter()
            .map(|d| IsoPacket {
                length: in_flight.packet_size.min(d.length as usize),
                actual_length: d.actual_length as usize,
                status: transfer_status(d.status),
            })
            .collect();
        let status = transfer_status(t.status);
        ffi::libusb_free_transfer(transfer);
        (in_flight, status, packets)
    };

    if let Some(callback) = in_flight.on_complete.take() {
        callback(IsoCompletion {
            status,
            buffer: std::mem::take(&mut in_flight.buffer),
            packets,
        });
    }
}

fn transfer_status(status: c_int) -> TransferStatus {
    use ffi::constants::*;
    match status {
        LIBUSB_TRANSFER_COMPLETED => TransferStatus::Completed,
        LIBUSB_TRANSFER_TIMED_OUT => TransferStatus::TimedOut,
        LIBUSB_TRANSFER_CANCELLED => TransferStatus::Cancelled,
        LIBUSB_TRANSFER_STALL => TransferStatus::Stall,
        LIBUSB_TRANSFER_NO_DEVICE => TransferStatus::NoDevice,
        LIBUSB_TRANSFER_OVERFLOW => TransferStatus::Overflow,
        _ => TransferStatus::Error,
    }
}

fn libusb_error(code: c_int) -> TransportError {
    use ffi::constants::*;
    let e = match code {
        LIBUSB_ERROR_IO => rusb::Error::Io,
        LIBUSB_ERROR_INVALID_PARAM => rusb::Error::InvalidParam,
        LIBUSB_ERROR_ACCESS => rusb::Error::Access,
        LIBUSB_ERROR_NO_DEVICE => rusb::Error::NoDevice,
        LIBUSB_ERROR_NOT_FOUND => rusb::Error::NotFound,
        LIBUSB_ERROR_BUSY => rusb::Error::Busy,
        LIBUSB_ERROR_TIMEOUT => rusb::Error::Timeout,
        LIBUSB_ERROR_OVERFLOW => rusb::Error::Overflow,
        LIBUSB_ERROR_PIPE => rusb::Error::Pipe,
        LIBUSB_ERROR_INTERRUPTED => rusb::Error::Interrupted,
        LIBUSB_ERROR_NO_MEM => rusb::Error::NoMem,
        LIBUSB_ERROR_NOT_SUPPORTED => rusb::Error::NotSupported,
        _ => rusb::Error::Other,
    };
    TransportError::from_usb(e)
}

//! In-memory transport for unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use ib200_protocol::types::{PROBE_VALUE, REQUEST_TYPE_VENDOR_OUT};
use ib200_protocol::{CommandFrame, ControlRequest, FRAME_SIZE};

use super::{IsoCallback, IsoCompletion, IsoPacket, IsoRequest, TransferStatus, UsbTransport};
use crate::error::TransportError;

/// One recorded transport operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    ControlOut {
        request: ControlRequest,
        data: Vec<u8>,
    },
    ControlIn { request: ControlRequest, len: usize },
    SetConfiguration(u8),
    ClaimInterface(u8),
    ReleaseInterface(u8),
    SetAlternateSetting(u8, u8),
    SubmitIso(IsoRequest),
}

impl Op {
    pub(crate) fn frame(&self) -> Option<CommandFrame> {
        match self {
            Op::ControlOut { request, data }
                if request.request_type == REQUEST_TYPE_VENDOR_OUT && data.len() == FRAME_SIZE =>
            {
                CommandFrame::parse(data).ok()
            }
            _ => None,
        }
    }

    pub(crate) fn is_probe(&self) -> bool {
        matches!(self, Op::ControlIn { request, .. } if request.value == PROBE_VALUE)
    }
}

type OpFilter = Box<dyn Fn(&Op) -> bool + Send + Sync>;

/// How submitted isochronous transfers complete.
pub(crate) enum IsoMode {
    /// Held until the test calls [`MockTransport::complete_next`].
    Deferred,
    /// Completed from a helper thread using the scripted packet lengths.
    /// Once the script runs dry `exhausted` is raised and the remaining
    /// transfers complete with empty packets.
    Scripted {
        script: VecDeque<Vec<usize>>,
        exhausted: Arc<AtomicBool>,
    },
}

pub(crate) struct MockTransport {
    ops: Mutex<Vec<Op>>,
    fail: Mutex<Option<(usize, OpFilter)>>,
    replies: Mutex<VecDeque<Vec<u8>>>,
    max_iso_packet_size: usize,
    iso_mode: Mutex<IsoMode>,
    pending: Mutex<VecDeque<(IsoRequest, IsoCallback)>>,
    fill_byte: AtomicUsize,
    outstanding: Arc<AtomicUsize>,
    peak_outstanding: Arc<AtomicUsize>,
    fail_submissions: AtomicBool,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            fail: Mutex::new(None),
            replies: Mutex::new(VecDeque::new()),
            max_iso_packet_size: 940,
            iso_mode: Mutex::new(IsoMode::Deferred),
            pending: Mutex::new(VecDeque::new()),
            fill_byte: AtomicUsize::new(1),
            outstanding: Arc::new(AtomicUsize::new(0)),
            peak_outstanding: Arc::new(AtomicUsize::new(0)),
            fail_submissions: AtomicBool::new(false),
        }
    }

    pub(crate) fn with_max_iso_packet_size(mut self, size: usize) -> Self {
        self.max_iso_packet_size = size;
        self
    }

    /// Fail the `nth` (0-based) operation accepted by `filter`.
    pub(crate) fn fail_nth(
        &self,
        nth: usize,
        filter: impl Fn(&Op) -> bool + Send + Sync + 'static,
    ) {
        *self.fail.lock() = Some((nth, Box::new(filter)));
    }

    pub(crate) fn fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn push_reply(&self, reply: &[u8]) {
        self.replies.lock().push_back(reply.to_vec());
    }

    pub(crate) fn set_iso_mode(&self, mode: IsoMode) {
        *self.iso_mode.lock() = mode;
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.ops.lock().clone()
    }

    pub(crate) fn frames(&self) -> Vec<CommandFrame> {
        self.ops.lock().iter().filter_map(Op::frame).collect()
    }

    pub(crate) fn clear(&self) {
        self.ops.lock().clear();
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub(crate) fn peak_outstanding(&self) -> usize {
        self.peak_outstanding.load(Ordering::SeqCst)
    }

    /// Complete the oldest deferred transfer with the given micro-packet
    /// lengths. Returns false if nothing was pending.
    pub(crate) fn complete_next(&self, actual_lengths: &[usize]) -> bool {
        let next = self.pending.lock().pop_front();
        match next {
            Some((request, callback)) => {
                let completion =
                    self.build_completion(&request, actual_lengths, TransferStatus::Completed);
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                callback(completion);
                true
            }
            None => false,
        }
    }

    /// Complete the oldest deferred transfer with a failed status.
    pub(crate) fn fail_next(&self) -> bool {
        let next = self.pending.lock().pop_front();
        match next {
            Some((request, callback)) => {
                let completion = self.build_completion(&request, &[], TransferStatus::Error);
                self.outstanding.fetch_sub(1, Ordering::SeqCst);
                callback(completion);
                true
            }
            None => false,
        }
    }

    fn build_completion(
        &self,
        request: &IsoRequest,
        lengths: &[usize],
        status: TransferStatus,
    ) -> IsoCompletion {
        let mut buffer = vec![0u8; request.buffer_len()];
        let mut packets = Vec::with_capacity(request.packet_count);
        for i in 0..request.packet_count {
            let actual = lengths.get(i).copied().unwrap_or(0).min(request.packet_size);
            let fill = self.fill_byte.fetch_add(1, Ordering::SeqCst) as u8;
            let start = i * request.packet_size;
            buffer[start..start + actual].fill(fill);
            packets.push(IsoPacket {
                length: request.packet_size,
                actual_length: actual,
                status: TransferStatus::Completed,
            });
        }
        IsoCompletion {
            status,
            buffer,
            packets,
        }
    }

    fn record(&self, op: Op) -> Result<(), TransportError> {
        let fail = {
            let mut guard = self.fail.lock();
            match guard.as_mut() {
                Some((nth, filter)) if filter(&op) => {
                    if *nth == 0 {
                        *guard = None;
                        true
                    } else {
                        *nth -= 1;
                        false
                    }
                }
                _ => false,
            }
        };
        self.ops.lock().push(op);
        if fail {
            return Err(TransportError::Usb(rusb::Error::Pipe));
        }
        Ok(())
    }
}

impl UsbTransport for MockTransport {
    fn control_out(&self, request: ControlRequest, data: &[u8]) -> Result<usize, TransportError> {
        self.record(Op::ControlOut {
            request,
            data: data.to_vec(),
        })?;
        Ok(data.len())
    }

    fn control_in(&self, request: ControlRequest, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.record(Op::ControlIn {
            request,
            len: buf.len(),
        })?;
        let reply = self.replies.lock().pop_front().unwrap_or_else(|| vec![0u8; buf.len()]);
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn set_configuration(&mut self, configuration: u8) -> Result<(), TransportError> {
        self.record(Op::SetConfiguration(configuration))
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        self.record(Op::ClaimInterface(interface))
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        self.record(Op::ReleaseInterface(interface))
    }

    fn set_alternate_setting(&mut self, interface: u8, setting: u8) -> Result<(), TransportError> {
        self.record(Op::SetAlternateSetting(interface, setting))
    }

    fn max_iso_packet_size(&self, _endpoint: u8) -> Result<usize, TransportError> {
        Ok(self.max_iso_packet_size)
    }

    fn submit_iso(
        &self,
        request: IsoRequest,
        on_complete: IsoCallback,
    ) -> Result<(), TransportError> {
        self.record(Op::SubmitIso(request))?;
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(TransportError::Submit("mock submission failure".to_string()));
        }

        let now = self.outstanding.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_outstanding.fetch_max(now, Ordering::SeqCst);

        let mut mode = self.iso_mode.lock();
        match &mut *mode {
            IsoMode::Deferred => {
                self.pending.lock().push_back((request, on_complete));
            }
            IsoMode::Scripted { script, exhausted } => {
                let lengths = match script.pop_front() {
                    Some(l) => l,
                    None => {
                        exhausted.store(true, Ordering::SeqCst);
                        Vec::new()
                    }
                };
                let completion =
                    self.build_completion(&request, &lengths, TransferStatus::Completed);
                let outstanding = self.outstanding.clone();
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(1));
                    outstanding.fetch_sub(1, Ordering::SeqCst);
                    on_complete(completion);
                });
            }
        }
        Ok(())
    }
}

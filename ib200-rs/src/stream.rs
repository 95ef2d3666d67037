//! Isochronous transport-stream engine.
//!
//! At most `max_in_flight` transfers are outstanding at any time. Completions
//! arrive on the transport's event thread; the in-flight counter and the
//! reassembled output live behind one mutex, and the submitting side sleeps
//! on a condition variable until a transfer retires.

use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex};
use serde::Deserialize;

use ib200_protocol::types::{MAX_IN_FLIGHT, STREAM_ENDPOINT, TS_PACKET_SIZE};

use crate::error::{DeviceError, Result};
use crate::transport::{IsoCallback, IsoCompletion, IsoRequest, UsbTransport};

/// How long a blocked reader waits for a completion before re-checking its
/// stop conditions.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Streaming parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub endpoint: u8,
    /// Requested micro-packet size. Clamped to the endpoint maximum.
    pub packet_size: usize,
    pub packets_per_transfer: usize,
    /// Capped at 8.
    pub max_in_flight: usize,
    pub transfer_timeout_ms: u32,
    /// Reassembled bytes held before the engine stops submitting.
    pub max_buffered: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: STREAM_ENDPOINT,
            packet_size: 5 * TS_PACKET_SIZE,
            packets_per_transfer: 64,
            max_in_flight: MAX_IN_FLIGHT,
            transfer_timeout_ms: 10_000,
            max_buffered: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub transfers_submitted: u64,
    pub transfers_completed: u64,
    pub transfers_failed: u64,
    /// Completed transfers in which no micro-packet carried data.
    pub empty_transfers: u64,
    pub packets_received: u64,
    pub packets_dropped: u64,
    pub bytes_delivered: u64,
    /// Micro-packet size actually used after clamping.
    pub packet_size: usize,
}

struct EngineState {
    in_flight: usize,
    output: BytesMut,
    stats: StreamStats,
}

struct Shared {
    state: Mutex<EngineState>,
    retired: Condvar,
}

impl Shared {
    /// Completion handler. Appends every non-empty micro-packet in order and
    /// frees the request slot.
    fn complete(&self, completion: IsoCompletion) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);

        if !completion.status.is_ok() {
            state.stats.transfers_failed += 1;
            warn!("Isochronous transfer failed: {:?}", completion.status);
        } else {
            state.stats.transfers_completed += 1;
            let mut received = 0u64;
            for payload in completion.payloads() {
                state.output.extend_from_slice(payload);
                state.stats.bytes_delivered += payload.len() as u64;
                received += 1;
            }
            let total = completion.packets.len() as u64;
            state.stats.packets_received += received;
            state.stats.packets_dropped += total - received;
            if received == 0 {
                state.stats.empty_transfers += 1;
                debug!("Isochronous transfer carried no payload ({} packets)", total);
            }
        }

        drop(state);
        self.retired.notify_all();
    }
}

pub struct StreamEngine {
    config: StreamConfig,
    packet_size: usize,
    max_in_flight: usize,
    shared: Arc<Shared>,
}

impl StreamEngine {
    /// Prepare an engine for `transport`. The requested packet size is
    /// clamped to the endpoint's maximum isochronous packet size.
    pub fn new<T: UsbTransport + ?Sized>(transport: &T, config: StreamConfig) -> Result<Self> {
        if config.packets_per_transfer == 0 || config.packet_size == 0 {
            return Err(DeviceError::Config(
                "stream packet size and packets per transfer must be non-zero".to_string(),
            ));
        }

        let max = transport.max_iso_packet_size(config.endpoint)?;
        let packet_size = if config.packet_size > max {
            info!(
                "Clamping isochronous packet size {} to endpoint maximum {}",
                config.packet_size, max
            );
            max
        } else {
            config.packet_size
        };
        if packet_size == 0 {
            return Err(DeviceError::InvalidState(format!(
                "endpoint 0x{:02x} has no isochronous bandwidth, \
                 is the streaming alt setting selected?",
                config.endpoint
            )));
        }

        let max_in_flight = config.max_in_flight.clamp(1, MAX_IN_FLIGHT);

        Ok(Self {
            config,
            packet_size,
            max_in_flight,
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState {
                    in_flight: 0,
                    output: BytesMut::new(),
                    stats: StreamStats {
                        packet_size,
                        ..StreamStats::default()
                    },
                }),
                retired: Condvar::new(),
            }),
        })
    }

    /// Micro-packet size in use.
    pub fn packet_size(&self) -> usize {
        self.packet_size
    }

    pub fn in_flight(&self) -> usize {
        self.shared.state.lock().in_flight
    }

    pub fn buffered(&self) -> usize {
        self.shared.state.lock().output.len()
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.state.lock().stats.clone()
    }

    fn request(&self) -> IsoRequest {
        IsoRequest {
            endpoint: self.config.endpoint,
            packet_size: self.packet_size,
            packet_count: self.config.packets_per_transfer,
            timeout_ms: self.config.transfer_timeout_ms,
        }
    }

    fn callback(&self) -> IsoCallback {
        let shared = self.shared.clone();
        Box::new(move |completion| shared.complete(completion))
    }

    /// Submit one transfer if a slot is free and the output is below the
    /// buffering limit. Returns whether a transfer was submitted.
    pub fn submit<T: UsbTransport + ?Sized>(&self, transport: &T) -> Result<bool> {
        {
            let mut state = self.shared.state.lock();
            if state.in_flight >= self.max_in_flight
                || state.output.len() >= self.config.max_buffered
            {
                return Ok(false);
            }
            state.in_flight += 1;
            state.stats.transfers_submitted += 1;
        }

        // The transport may complete synchronously, so no lock is held here.
        if let Err(e) = transport.submit_iso(self.request(), self.callback()) {
            let mut state = self.shared.state.lock();
            state.in_flight -= 1;
            state.stats.transfers_submitted -= 1;
            return Err(e.into());
        }
        Ok(true)
    }

    /// Submit until every slot is taken. Returns the number submitted.
    pub fn fill<T: UsbTransport + ?Sized>(&self, transport: &T) -> Result<usize> {
        let mut submitted = 0;
        while self.submit(transport)? {
            submitted += 1;
        }
        Ok(submitted)
    }

    /// Block until output is available or a transfer retires, at most
    /// `timeout`. Returns true if output is buffered.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.shared.state.lock();
        if state.output.is_empty() && state.in_flight > 0 {
            self.shared.retired.wait_for(&mut state, timeout);
        }
        !state.output.is_empty()
    }

    /// Move up to `buf.len()` reassembled bytes into `buf`.
    pub fn read_output(&self, buf: &mut [u8]) -> usize {
        let mut state = self.shared.state.lock();
        let n = buf.len().min(state.output.len());
        state.output.copy_to_slice(&mut buf[..n]);
        n
    }

    /// Wait for every outstanding transfer to retire.
    pub fn drain(&self) {
        let mut state = self.shared.state.lock();
        let started = Instant::now();
        while state.in_flight > 0 {
            let timed_out = self
                .shared
                .retired
                .wait_for(&mut state, Duration::from_secs(1))
                .timed_out();
            if timed_out && state.in_flight > 0 {
                warn!(
                    "Still waiting for {} isochronous transfers ({:?})",
                    state.in_flight,
                    started.elapsed()
                );
            }
        }
        debug!("Stream drained in {:?}", started.elapsed());
    }
}

/// Why a [`TsStream`] stops producing bytes.
#[derive(Debug, Clone, Copy)]
pub struct StopCondition<'a> {
    pub stop: &'a AtomicBool,
    pub deadline: Option<Instant>,
}

impl StopCondition<'_> {
    fn reached(&self) -> bool {
        self.stop.load(Ordering::Relaxed) || self.deadline.map_or(false, |d| Instant::now() >= d)
    }
}

/// Pull-style view of the engine. Reads block until bytes are available and
/// return end-of-stream once the stop condition is reached and every
/// outstanding transfer has drained.
pub struct TsStream<'a, T: UsbTransport + ?Sized> {
    engine: &'a StreamEngine,
    transport: &'a T,
    until: StopCondition<'a>,
    finished: bool,
}

impl<'a, T: UsbTransport + ?Sized> TsStream<'a, T> {
    pub fn new(engine: &'a StreamEngine, transport: &'a T, until: StopCondition<'a>) -> Self {
        Self {
            engine,
            transport,
            until,
            finished: false,
        }
    }

    fn finish(&mut self) {
        if !self.finished {
            self.finished = true;
            self.engine.drain();
        }
    }
}

impl<T: UsbTransport + ?Sized> Read for TsStream<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.engine.read_output(buf);
            if n > 0 {
                return Ok(n);
            }
            if self.finished {
                return Ok(0);
            }
            if self.until.reached() {
                self.finish();
                continue;
            }
            if let Err(e) = self.engine.fill(self.transport) {
                self.finish();
                return Err(io::Error::new(io::ErrorKind::Other, e));
            }
            self.engine.wait(POLL_INTERVAL);
        }
    }
}

impl<T: UsbTransport + ?Sized> Drop for TsStream<'_, T> {
    fn drop(&mut self) {
        self.finish();
    }
}

//! Device session: the five operator operations on one open device.

use std::io::{self, Write};
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use ib200_protocol::types::{LED_OFF, LED_ON, USB_CONFIGURATION, USB_INTERFACE};
use ib200_protocol::max2163::DEFAULT_REFERENCE_DIVIDER;
use ib200_protocol::{
    frequency_to_dividers, physical_channel, BringupVariant, Firmware, PllSetting, Register,
    Status, Trailer, TunerProfile,
};

use crate::bringup::{self, BringupPlan, BringupReport};
use crate::control::ControlChannel;
use crate::error::{DeviceError, Result, TransportError};
use crate::stream::{StopCondition, StreamConfig, StreamEngine, StreamStats, TsStream};
use crate::transport::UsbTransport;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Device opened, nothing sent yet.
    Opened,
    /// Bring-up finished.
    Ready,
    Streaming,
    /// A bring-up or register sequence failed half way. Only `close` is
    /// allowed.
    Poisoned,
}

/// Static settings of a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub configuration: u8,
    pub interface: u8,
    pub variant: BringupVariant,
    pub profile: TunerProfile,
    pub reference_divider: u16,
    /// Frequency programmed during bring-up, in MHz.
    pub initial_frequency: i32,
    pub stream: StreamConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            configuration: USB_CONFIGURATION,
            interface: USB_INTERFACE,
            variant: BringupVariant::default(),
            profile: TunerProfile::default(),
            reference_divider: DEFAULT_REFERENCE_DIVIDER,
            initial_frequency: 491,
            stream: StreamConfig::default(),
        }
    }
}

/// Result of a tune.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TuneReport {
    pub pll: PllSetting,
    /// UHF physical channel, if the frequency is in the broadcast table.
    pub channel: Option<u8>,
}

/// Result of a signal check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalStatus {
    pub raw: u8,
    pub status: Status,
}

impl SignalStatus {
    pub fn is_locked(&self) -> bool {
        self.status.is_locked()
    }
}

pub struct DeviceSession<T: UsbTransport> {
    channel: ControlChannel<T>,
    config: SessionConfig,
    state: SessionState,
    tuned: Option<PllSetting>,
}

impl<T: UsbTransport> DeviceSession<T> {
    /// Take ownership of an opened transport.
    pub fn open(transport: T, config: SessionConfig) -> Self {
        Self::with_channel(ControlChannel::new(transport), config)
    }

    pub(crate) fn with_channel(channel: ControlChannel<T>, config: SessionConfig) -> Self {
        Self {
            channel,
            config,
            state: SessionState::Opened,
            tuned: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Frequency the PLL is currently programmed to.
    pub fn tuned(&self) -> Option<&PllSetting> {
        self.tuned.as_ref()
    }

    pub fn transport(&self) -> &T {
        self.channel.transport()
    }

    fn require(&self, expected: SessionState, op: &str) -> Result<()> {
        match self.state {
            SessionState::Poisoned => Err(DeviceError::SessionUnusable),
            s if s == expected => Ok(()),
            s => Err(DeviceError::InvalidState(format!(
                "{} requires {:?}, session is {:?}",
                op, expected, s
            ))),
        }
    }

    /// Mark the session unusable if `result` failed after touching the device.
    fn poison_on_error<R>(&mut self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            if !e.is_invalid_argument() {
                error!("Device state unknown after failure, session poisoned: {}", e);
                self.state = SessionState::Poisoned;
            }
        }
        result
    }

    /// Run the full bring-up sequence.
    pub fn initialize(&mut self, firmware: &Firmware) -> Result<BringupReport> {
        self.require(SessionState::Opened, "initialize")?;

        let pll = frequency_to_dividers(
            self.config.initial_frequency,
            self.config.reference_divider,
        )?;
        let plan = BringupPlan {
            configuration: self.config.configuration,
            interface: self.config.interface,
            variant: self.config.variant,
            profile: &self.config.profile,
            pll,
            firmware,
        };

        match bringup::run(&mut self.channel, &plan) {
            Ok(report) => {
                self.state = SessionState::Ready;
                self.tuned = Some(pll);
                Ok(report)
            }
            Err(e) => {
                error!("{}", e);
                self.state = SessionState::Poisoned;
                Err(e)
            }
        }
    }

    /// Retune to `freq_mhz`. Frequencies without a known broadcaster are
    /// accepted with a warning.
    pub fn tune(&mut self, freq_mhz: i32) -> Result<TuneReport> {
        self.require(SessionState::Ready, "tune")?;

        let pll = frequency_to_dividers(freq_mhz, self.config.reference_divider)?;
        if !pll.known_broadcaster {
            warn!("There are no known broadcasters on frequency {} MHz", freq_mhz);
        }

        // Pack everything up front so a bad field never leaves a half
        // written divider behind.
        let program = self.config.profile.retune(&pll);
        for setting in &program {
            ib200_protocol::pack_register(setting)?;
        }

        let result = program
            .iter()
            .try_for_each(|setting| self.channel.program_register(setting, true).map(|_| ()));
        self.poison_on_error(result)?;

        info!(
            "Tuned to {} MHz (R={}, N={}, band {})",
            freq_mhz,
            pll.dividers.r(),
            pll.dividers.n(),
            pll.band
        );
        self.tuned = Some(pll);
        Ok(TuneReport {
            pll,
            channel: physical_channel(freq_mhz),
        })
    }

    /// Read the MAX2163 status register and report PLL lock.
    pub fn check_signal(&mut self) -> Result<SignalStatus> {
        self.require(SessionState::Ready, "check_signal")?;

        let mut buf = [0u8; 1];
        let result = self
            .channel
            .write_then_read(Register::Status, 0x00, Trailer::STATUS_POLL, &mut buf);
        let n = self.poison_on_error(result)?;
        if n == 0 {
            return Err(TransportError::ShortTransfer {
                expected: 1,
                actual: 0,
            }
            .into());
        }

        let status = Status::unpack(buf[0]);
        info!(
            "Status 0x{:02x}: vtune_adc={} charge_pump={} power_cycled={}",
            buf[0], status.vtune_adc, status.charge_pump, status.power_cycled
        );
        Ok(SignalStatus {
            raw: buf[0],
            status,
        })
    }

    /// Stream transport-stream bytes into `sink` until `stop` is raised or
    /// `duration` elapses. Outstanding transfers are drained before return.
    pub fn start_streaming<W: Write + ?Sized>(
        &mut self,
        sink: &mut W,
        stop: &AtomicBool,
        duration: Option<Duration>,
    ) -> Result<StreamStats> {
        self.require(SessionState::Ready, "start_streaming")?;

        let engine = StreamEngine::new(self.channel.transport(), self.config.stream)?;
        info!(
            "Streaming from endpoint 0x{:02x}: {} x {} bytes per transfer, {} in flight",
            self.config.stream.endpoint,
            self.config.stream.packets_per_transfer,
            engine.packet_size(),
            self.config.stream.max_in_flight.min(ib200_protocol::types::MAX_IN_FLIGHT)
        );

        self.state = SessionState::Streaming;
        let started = Instant::now();
        let result = {
            let mut reader = TsStream::new(
                &engine,
                self.channel.transport(),
                StopCondition {
                    stop,
                    deadline: duration.map(|d| started + d),
                },
            );
            io::copy(&mut reader, sink).and_then(|_| sink.flush())
        };
        self.state = SessionState::Ready;

        let stats = engine.stats();
        info!(
            "Stream finished after {:?}: {} bytes, {} transfers ({} failed, {} empty)",
            started.elapsed(),
            stats.bytes_delivered,
            stats.transfers_completed,
            stats.transfers_failed,
            stats.empty_transfers
        );
        result.map_err(device_error_from_io)?;
        Ok(stats)
    }

    /// Toggle the front LED `times` times.
    pub fn blink_indicator(&mut self, times: u32) -> Result<()> {
        if self.state == SessionState::Poisoned {
            return Err(DeviceError::SessionUnusable);
        }
        if self.state == SessionState::Streaming {
            return Err(DeviceError::InvalidState("cannot blink while streaming".to_string()));
        }
        for _ in 0..times {
            self.channel.vendor_command(&LED_OFF)?;
            self.channel.vendor_command(&LED_ON)?;
        }
        Ok(())
    }

    /// Release the interface and give the transport back.
    pub fn close(mut self) -> Result<T> {
        if self.state != SessionState::Opened {
            let interface = self.config.interface;
            if let Err(e) = self.channel.transport_mut().release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
            }
        }
        info!("Session closed");
        Ok(self.channel.into_transport())
    }
}

fn device_error_from_io(e: io::Error) -> DeviceError {
    if !e.get_ref().map_or(false, |inner| inner.is::<DeviceError>()) {
        return DeviceError::Io(e);
    }
    match e.into_inner().map(|inner| inner.downcast::<DeviceError>()) {
        Some(Ok(inner)) => *inner,
        Some(Err(other)) => DeviceError::Io(io::Error::new(io::ErrorKind::Other, other)),
        None => DeviceError::Io(io::Error::new(io::ErrorKind::Other, "stream failed")),
    }
}

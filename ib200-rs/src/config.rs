//! Configuration file.
//!
//! ```toml
//! [device]
//! vendor_id = 0x5a57
//! product_id = 0x4210
//!
//! [tuner]
//! reference_divider = 0x70
//! initial_frequency = 491
//! agc_threshold = 3
//!
//! [bringup]
//! variant = "led-and-vendor-write"
//! firmware = "ib200-firmware.bin"
//!
//! [stream]
//! packet_size = 940
//! packets_per_transfer = 64
//!
//! [logging]
//! level = "info"
//! file = "ib200.log"
//! ```
//!
//! Every key is optional.
//!
//! The default `reference_divider` (0x70) cannot synthesise 773 MHz and up,
//! so UHF channels 63..=69 fail to tune. Set it to 96 to cover every channel.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use ib200_protocol::max2163::DEFAULT_REFERENCE_DIVIDER;
use ib200_protocol::types::{PRODUCT_ID, USB_CONFIGURATION, USB_INTERFACE, VENDOR_ID};
use ib200_protocol::{BringupVariant, TunerProfile};

use crate::error::{DeviceError, Result};
use crate::session::SessionConfig;
use crate::stream::StreamConfig;

/// Looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "ib200.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceSection,
    pub tuner: TunerSection,
    pub bringup: BringupSection,
    pub stream: StreamConfig,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceSection {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface: u8,
    pub configuration: u8,
}

impl Default for DeviceSection {
    fn default() -> Self {
        Self {
            vendor_id: VENDOR_ID,
            product_id: PRODUCT_ID,
            interface: USB_INTERFACE,
            configuration: USB_CONFIGURATION,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TunerSection {
    pub reference_divider: u16,
    pub initial_frequency: i32,
    #[serde(flatten)]
    pub profile: TunerProfile,
}

impl Default for TunerSection {
    fn default() -> Self {
        Self {
            reference_divider: DEFAULT_REFERENCE_DIVIDER,
            initial_frequency: 491,
            profile: TunerProfile::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BringupSection {
    pub variant: BringupVariant,
    /// 56-byte firmware image cut out of the vendor driver.
    pub firmware: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub file: Option<PathBuf>,
}

impl Config {
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| DeviceError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DeviceError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&contents)
    }

    /// Explicit path, then [`DEFAULT_CONFIG_FILE`] if present, then defaults.
    /// Returns the path that was loaded, if any.
    pub fn discover(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        let path = explicit.map(Path::to_path_buf).or_else(|| {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            default_path.exists().then_some(default_path)
        });
        match path {
            Some(p) => Ok((Self::load(&p)?, Some(p))),
            None => Ok((Self::default(), None)),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            configuration: self.device.configuration,
            interface: self.device.interface,
            variant: self.bringup.variant,
            profile: self.tuner.profile,
            reference_divider: self.tuner.reference_divider,
            initial_frequency: self.tuner.initial_frequency,
            stream: self.stream,
        }
    }
}

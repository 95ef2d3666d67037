//! ib200 library - userspace driver for the Zinwell IB-200 ISDB-T 1seg tuner
//!
//! The device is brought up and tuned through vendor control transfers and
//! streams the transport stream over an isochronous endpoint.

pub mod bringup;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod session;
pub mod stream;
pub mod transport;

// Re-export commonly used types
pub use bringup::{BringupReport, BringupStep};
pub use config::Config;
pub use control::ControlChannel;
pub use error::{DeviceError, TransportError};
pub use session::{DeviceSession, SessionConfig, SessionState, SignalStatus, TuneReport};
pub use stream::{StreamConfig, StreamEngine, StreamStats, TsStream};
pub use transport::{open_device, UsbDeviceTransport, UsbTransport};

//! Constants and plain data types shared by every layer of the driver.

use serde::{Deserialize, Serialize};

/// Zinwell vendor id.
pub const VENDOR_ID: u16 = 0x5a57;

/// IB-200 / DTV UB-10 product id.
pub const PRODUCT_ID: u16 = 0x4210;

/// USB configuration selected before claiming the interface.
pub const USB_CONFIGURATION: u8 = 1;

/// The only interface the device exposes.
pub const USB_INTERFACE: u8 = 0;

/// Alternate setting with no isochronous bandwidth reserved.
pub const ALT_SETTING_IDLE: u8 = 0;

/// Alternate setting that enables the isochronous streaming endpoint.
pub const ALT_SETTING_STREAMING: u8 = 1;

/// Isochronous IN endpoint carrying the transport stream.
pub const STREAM_ENDPOINT: u8 = 0x82;

/// Transport stream packet size.
pub const TS_PACKET_SIZE: usize = 188;

/// Upper bound on concurrently outstanding isochronous transfers.
pub const MAX_IN_FLIGHT: usize = 8;

/// Timeout applied to every control transfer, in milliseconds.
pub const CONTROL_TIMEOUT_MS: u64 = 1000;

/// Spacing the device needs after every control-channel command, in milliseconds.
pub const SETTLE_DELAY_MS: u64 = 10;

/// bmRequestType: vendor, device recipient, host to device.
pub const REQUEST_TYPE_VENDOR_OUT: u8 = 0x40;

/// bmRequestType: vendor, device recipient, device to host.
pub const REQUEST_TYPE_VENDOR_IN: u8 = 0xc0;

/// bRequest used by every control-channel exchange.
pub const VENDOR_REQUEST: u8 = 0x01;

/// wValue selecting the command sub-channel.
pub const COMMAND_VALUE: u16 = 0x000b;

/// wValue selecting the configuration probe.
pub const PROBE_VALUE: u16 = 0x0001;

/// Length of the configuration probe reply.
pub const PROBE_LENGTH: usize = 2;

/// Parameters of one vendor control transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    /// Host-to-device command carrying a 13-byte frame.
    pub const fn command_out() -> Self {
        Self {
            request_type: REQUEST_TYPE_VENDOR_OUT,
            request: VENDOR_REQUEST,
            value: COMMAND_VALUE,
            index: 0,
        }
    }

    /// Device-to-host read on the command sub-channel.
    pub const fn command_in() -> Self {
        Self {
            request_type: REQUEST_TYPE_VENDOR_IN,
            request: VENDOR_REQUEST,
            value: COMMAND_VALUE,
            index: 0,
        }
    }

    /// Configuration probe issued before endpoint priming.
    pub const fn probe() -> Self {
        Self {
            request_type: REQUEST_TYPE_VENDOR_IN,
            request: VENDOR_REQUEST,
            value: PROBE_VALUE,
            index: 0,
        }
    }

    /// Returns true for device-to-host requests.
    pub fn is_in(&self) -> bool {
        self.request_type & 0x80 != 0
    }
}

// ---------------------------------------------------------------------------
// Frame addressing
// ---------------------------------------------------------------------------

/// Byte 0 of every command frame.
pub const CHANNEL_SELECTOR: u8 = 0x0b;

/// Byte 3 of every command frame observed on the wire.
pub const SUB_TARGET: u8 = 0x82;

/// Target address of generic vendor commands (LED, priming).
pub const VENDOR_ADDRESS: u16 = 0x0000;

/// Target address of the I2C bridge in front of the MAX2163.
pub const I2C_BRIDGE_ADDRESS: u16 = 0x0010;

/// Target address of the shadow mirror space.
pub const SHADOW_ADDRESS: u16 = 0x0020;

/// Target address receiving firmware chunks.
pub const FIRMWARE_UPLOAD_ADDRESS: u16 = 0x0040;

/// Trailing byte of a command frame.
///
/// Trailers are vendor-opaque: every value below was captured from the
/// Windows driver's traffic and is replayed verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Trailer(pub u8);

impl Trailer {
    pub const LED_ON: Trailer = Trailer(0x5a);
    pub const LED_OFF: Trailer = Trailer(0xda);
    pub const PRIMING: Trailer = Trailer(0x43);
    pub const FINALIZE: Trailer = Trailer(0x74);
    pub const FIRMWARE: Trailer = Trailer(0x61);
    pub const STATUS_POLL: Trailer = Trailer(0x4a);

    pub const IF_FILTER: Trailer = Trailer(0x3c);
    pub const VAS: Trailer = Trailer(0x3d);
    pub const VCO: Trailer = Trailer(0x3e);
    pub const RF_FILTER: Trailer = Trailer(0x3f);
    pub const MODE: Trailer = Trailer(0x40);
    pub const RDIVIDER_MSB: Trailer = Trailer(0x41);
    pub const RDIVIDER_LSB: Trailer = Trailer(0x42);
    pub const NDIVIDER_MSB: Trailer = Trailer(0x44);
    pub const NDIVIDER_LSB: Trailer = Trailer(0x45);
}

/// A fully specified vendor command, replayed as captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VendorCommand {
    pub address: u16,
    pub data: [u8; 8],
    pub trailer: Trailer,
}

/// Front LED on.
pub const LED_ON: VendorCommand = VendorCommand {
    address: VENDOR_ADDRESS,
    data: [0x01, 0x30, 0x80, 0x00, 0x00, 0x00, 0x00, 0x00],
    trailer: Trailer::LED_ON,
};

/// Front LED off.
pub const LED_OFF: VendorCommand = VendorCommand {
    address: VENDOR_ADDRESS,
    data: [0x01, 0x30, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00],
    trailer: Trailer::LED_OFF,
};

/// Undocumented endpoint priming write that follows the LED command.
pub const PRIMING_WRITE: VendorCommand = VendorCommand {
    address: VENDOR_ADDRESS,
    data: [0x01, 0x16, 0x00, 0x00, 0xa8, 0x6d, 0x0d, 0x89],
    trailer: Trailer::PRIMING,
};

/// Extra delay the device needs after [`PRIMING_WRITE`], in milliseconds.
pub const PRIMING_DELAY_MS: u64 = 16;

/// Last command of the bring-up sequence. Without it the streaming
/// endpoint stays silent.
pub const FINALIZATION_POKE: VendorCommand = VendorCommand {
    address: SHADOW_ADDRESS,
    data: [0x01, 0x15, 0x80, 0x00, 0x1c, 0x0b, 0x00, 0x00],
    trailer: Trailer::FINALIZE,
};

/// Delay after switching to the streaming alternate setting, in milliseconds.
pub const STREAMING_ALT_DELAY_MS: u64 = 20;

/// One write of the undocumented register sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeWrite {
    pub register: u8,
    pub value: u8,
    pub trailer: Trailer,
    /// Whether the device expects a mirrored shadow write afterwards.
    pub shadow: bool,
}

/// Writes to registers 0x11..=0x16 observed after the tuner program.
/// The last one is never followed by a shadow write.
pub const UNDOCUMENTED_SWEEP: [ProbeWrite; 6] = [
    ProbeWrite {
        register: 0x11,
        value: 0x05,
        trailer: Trailer(0x52),
        shadow: true,
    },
    ProbeWrite {
        register: 0x12,
        value: 0x40,
        trailer: Trailer(0x53),
        shadow: true,
    },
    ProbeWrite {
        register: 0x13,
        value: 0x20,
        trailer: Trailer(0x54),
        shadow: true,
    },
    ProbeWrite {
        register: 0x14,
        value: 0x0f,
        trailer: Trailer(0x55),
        shadow: true,
    },
    ProbeWrite {
        register: 0x15,
        value: 0x80,
        trailer: Trailer(0x56),
        shadow: true,
    },
    ProbeWrite {
        register: 0x16,
        value: 0x00,
        trailer: Trailer(0x57),
        shadow: false,
    },
];

/// Endpoint priming sequences seen against the same hardware revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BringupVariant {
    /// LED on, then the undocumented priming write.
    #[default]
    LedAndVendorWrite,
    /// Probe read, priming write, probe read again.
    ProbeReadback,
}

impl std::fmt::Display for BringupVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BringupVariant::LedAndVendorWrite => write!(f, "led-and-vendor-write"),
            BringupVariant::ProbeReadback => write!(f, "probe-readback"),
        }
    }
}

// ---------------------------------------------------------------------------
// Frequency table
// ---------------------------------------------------------------------------

/// Centre frequencies (MHz) with known ISDB-T broadcasters, 6 MHz raster.
pub const FREQUENCY_TABLE: [u16; 56] = [
    473, 479, 485, 491, 497, 503, 509, 515, 521, 527,
    533, 539, 545, 551, 557, 563, 569, 575, 581, 587,
    593, 599, 605, 611, 617, 623, 629, 635, 641, 647,
    653, 659, 665, 671, 677, 683, 689, 695, 701, 707,
    713, 719, 725, 731, 737, 743, 749, 755, 761, 767,
    773, 779, 785, 791, 797, 803,
];

/// UHF physical channel of the first table entry.
pub const FIRST_PHYSICAL_CHANNEL: u8 = 14;

/// Returns true if `freq_mhz` is one of the broadcast frequencies.
pub fn is_known_frequency(freq_mhz: i32) -> bool {
    FREQUENCY_TABLE.iter().any(|&f| i32::from(f) == freq_mhz)
}

/// UHF physical channel number for a table frequency.
pub fn physical_channel(freq_mhz: i32) -> Option<u8> {
    FREQUENCY_TABLE
        .iter()
        .position(|&f| i32::from(f) == freq_mhz)
        .map(|idx| FIRST_PHYSICAL_CHANNEL + idx as u8)
}

/// Centre frequency of a UHF physical channel.
pub fn frequency_for_channel(channel: u8) -> Option<u16> {
    let idx = channel.checked_sub(FIRST_PHYSICAL_CHANNEL)? as usize;
    FREQUENCY_TABLE.get(idx).copied()
}

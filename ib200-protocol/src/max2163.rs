//! MAX2163 ISDB-T 1-segment tuner register map and PLL arithmetic.
//!
//! Register layout follows the datasheet: eleven named registers at
//! 0x00..=0x0A, seven reserved slots up to 0x11, and anything above that is
//! an undocumented probe register only reachable through the vendor bridge.

use serde::{Deserialize, Serialize};

use crate::error::{Divider, ProtocolError, Result};
use crate::types::{is_known_frequency, Trailer};

/// Crystal frequency feeding the PLL reference divider.
pub const CRYSTAL_MHZ: i64 = 32;

/// Reference divider used by the vendor driver.
///
/// With this divider the N-divider overflows above 767 MHz, so UHF channels
/// 63..=69 (773..=803 MHz) are unreachable. A divider of 96 covers the whole
/// broadcast table.
pub const DEFAULT_REFERENCE_DIVIDER: u16 = 0x70;

/// Legal R-divider range.
pub const R_DIVIDER_MIN: u16 = 16;
pub const R_DIVIDER_MAX: u16 = 511;

/// Legal N-divider range.
pub const N_DIVIDER_MIN: u16 = 1314;
pub const N_DIVIDER_MAX: u16 = 2687;

/// Rounding offset added before the integer division by the crystal.
const N_DIVIDER_OFFSET: i64 = 64;

/// MAX2163 register addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    IfFilter,
    Vas,
    Vco,
    RfFilter,
    Mode,
    RDividerMsb,
    RDividerLsb,
    NDividerMsb,
    NDividerLsb,
    /// Read-only.
    Status,
    /// Read-only.
    VasStatus,
    /// Reserved slot, 0x0B..=0x11.
    Reserved(u8),
    /// Undocumented register outside the datasheet map.
    Probe(u8),
}

impl Register {
    /// Order in which the tuner program writes the registers.
    pub const PROGRAM_ORDER: [Register; 9] = [
        Register::IfFilter,
        Register::Vas,
        Register::Vco,
        Register::RfFilter,
        Register::Mode,
        Register::RDividerMsb,
        Register::RDividerLsb,
        Register::NDividerMsb,
        Register::NDividerLsb,
    ];

    /// Registers rewritten on a frequency change.
    pub const RETUNE_ORDER: [Register; 5] = [
        Register::RfFilter,
        Register::RDividerMsb,
        Register::RDividerLsb,
        Register::NDividerMsb,
        Register::NDividerLsb,
    ];

    pub fn address(self) -> u8 {
        match self {
            Register::IfFilter => 0x00,
            Register::Vas => 0x01,
            Register::Vco => 0x02,
            Register::RfFilter => 0x03,
            Register::Mode => 0x04,
            Register::RDividerMsb => 0x05,
            Register::RDividerLsb => 0x06,
            Register::NDividerMsb => 0x07,
            Register::NDividerLsb => 0x08,
            Register::Status => 0x09,
            Register::VasStatus => 0x0a,
            Register::Reserved(addr) | Register::Probe(addr) => addr,
        }
    }

    /// Bits of the register the host is allowed to drive.
    pub fn mask(self) -> u8 {
        match self {
            Register::IfFilter | Register::Vas | Register::RfFilter => 0xff,
            Register::Vco => 0x7f,
            Register::Mode => 0xe0,
            Register::RDividerMsb | Register::NDividerMsb => 0xff,
            Register::RDividerLsb => 0xdd,
            Register::NDividerLsb => 0xf7,
            Register::Status => 0x3f,
            Register::VasStatus => 0xff,
            Register::Reserved(_) => 0x00,
            Register::Probe(_) => 0xff,
        }
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Register::Status | Register::VasStatus)
    }

    /// Trailer the vendor driver sends with writes to this register.
    pub fn trailer(self) -> Option<Trailer> {
        match self {
            Register::IfFilter => Some(Trailer::IF_FILTER),
            Register::Vas => Some(Trailer::VAS),
            Register::Vco => Some(Trailer::VCO),
            Register::RfFilter => Some(Trailer::RF_FILTER),
            Register::Mode => Some(Trailer::MODE),
            Register::RDividerMsb => Some(Trailer::RDIVIDER_MSB),
            Register::RDividerLsb => Some(Trailer::RDIVIDER_LSB),
            Register::NDividerMsb => Some(Trailer::NDIVIDER_MSB),
            Register::NDividerLsb => Some(Trailer::NDIVIDER_LSB),
            Register::Status => Some(Trailer::STATUS_POLL),
            _ => None,
        }
    }
}

impl From<u8> for Register {
    fn from(addr: u8) -> Self {
        match addr {
            0x00 => Register::IfFilter,
            0x01 => Register::Vas,
            0x02 => Register::Vco,
            0x03 => Register::RfFilter,
            0x04 => Register::Mode,
            0x05 => Register::RDividerMsb,
            0x06 => Register::RDividerLsb,
            0x07 => Register::NDividerMsb,
            0x08 => Register::NDividerLsb,
            0x09 => Register::Status,
            0x0a => Register::VasStatus,
            0x0b..=0x11 => Register::Reserved(addr),
            _ => Register::Probe(addr),
        }
    }
}

impl std::fmt::Display for Register {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Register::Reserved(a) => write!(f, "RESERVED(0x{:02x})", a),
            Register::Probe(a) => write!(f, "PROBE(0x{:02x})", a),
            other => write!(f, "{:?}(0x{:02x})", other, other.address()),
        }
    }
}

fn check_field(field: &'static str, value: u8, max: u8) -> Result<u8> {
    if value > max {
        return Err(ProtocolError::FieldOutOfRange {
            field,
            value: value as u32,
            max: max as u32,
        });
    }
    Ok(value)
}

fn bit(flag: bool, pos: u8) -> u8 {
    (flag as u8) << pos
}

// ---------------------------------------------------------------------------
// Register 0x00: IF filter
// ---------------------------------------------------------------------------

/// IF filter bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IfBandwidth {
    Mhz43 = 0,
    Mhz26 = 1,
    Mhz17 = 2,
    Mhz13 = 3,
}

/// IF filter centre-frequency source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilterSelect {
    Internal = 0,
    Manual = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IfFilter {
    pub bandwidth: IfBandwidth,
    /// Bias current code, 0..=3.
    pub bias_current: u8,
    pub filter_select: FilterSelect,
    /// Centre frequency code, 0..=7 (0.75 MHz .. 1.33 MHz).
    pub center_frequency: u8,
}

impl IfFilter {
    /// Centre frequency code for 1.00 MHz.
    pub const CENTER_1_00: u8 = 3;

    pub fn pack(&self) -> Result<u8> {
        let bias = check_field("if_filter.bias_current", self.bias_current, 0x03)?;
        let center = check_field("if_filter.center_frequency", self.center_frequency, 0x07)?;
        Ok((self.bandwidth as u8) | (bias << 2) | ((self.filter_select as u8) << 4) | (center << 5))
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            bandwidth: match byte & 0x03 {
                0 => IfBandwidth::Mhz43,
                1 => IfBandwidth::Mhz26,
                2 => IfBandwidth::Mhz17,
                _ => IfBandwidth::Mhz13,
            },
            bias_current: (byte >> 2) & 0x03,
            filter_select: if byte & 0x10 != 0 {
                FilterSelect::Manual
            } else {
                FilterSelect::Internal
            },
            center_frequency: (byte >> 5) & 0x07,
        }
    }
}

impl Default for IfFilter {
    fn default() -> Self {
        Self {
            bandwidth: IfBandwidth::Mhz13,
            bias_current: 0x03,
            filter_select: FilterSelect::Internal,
            center_frequency: Self::CENTER_1_00,
        }
    }
}

// ---------------------------------------------------------------------------
// Register 0x01: VCO autoselect
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vas {
    /// Autoselect wait time code, 0..=3 (14336 .. 45056 clocks).
    pub wait_time: u8,
    pub adc_read: bool,
    pub adc_latch: bool,
    pub cps_automatic: bool,
    pub vco_autoselect: bool,
    /// Autoselect start point code, 0..=3.
    pub start_at: u8,
}

impl Vas {
    pub fn pack(&self) -> Result<u8> {
        let wait = check_field("vas.wait_time", self.wait_time, 0x03)?;
        let start = check_field("vas.start_at", self.start_at, 0x03)?;
        Ok(wait
            | bit(self.adc_read, 2)
            | bit(self.adc_latch, 3)
            | bit(self.cps_automatic, 4)
            | bit(self.vco_autoselect, 5)
            | (start << 6))
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            wait_time: byte & 0x03,
            adc_read: byte & 0x04 != 0,
            adc_latch: byte & 0x08 != 0,
            cps_automatic: byte & 0x10 != 0,
            vco_autoselect: byte & 0x20 != 0,
            start_at: (byte >> 6) & 0x03,
        }
    }
}

impl Default for Vas {
    fn default() -> Self {
        Self {
            wait_time: 0,
            adc_read: true,
            adc_latch: false,
            cps_automatic: true,
            vco_autoselect: true,
            start_at: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Register 0x02: VCO
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Vco {
    pub vcob_low_power: bool,
    /// VCO sub-band, 0..=15.
    pub sub_band: u8,
    /// VCO select, 0..=2 (3 is not used by the silicon).
    pub vco: u8,
}

impl Vco {
    pub fn pack(&self) -> Result<u8> {
        let sub_band = check_field("vco.sub_band", self.sub_band, 0x0f)?;
        let vco = check_field("vco.vco", self.vco, 0x02)?;
        Ok(bit(self.vcob_low_power, 0) | (sub_band << 1) | (vco << 5))
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            vcob_low_power: byte & 0x01 != 0,
            sub_band: (byte >> 1) & 0x0f,
            vco: (byte >> 5) & 0x03,
        }
    }
}

// ---------------------------------------------------------------------------
// Register 0x03: RF filter
// ---------------------------------------------------------------------------

/// UHF tracking filter sub-band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterBand {
    Uhf470To488 = 0,
    Uhf488To512 = 1,
    Uhf512To542 = 2,
    Uhf542To572 = 3,
    Uhf572To608 = 4,
    Uhf608To656 = 5,
    Uhf656To710 = 6,
    Uhf710To806 = 7,
}

impl FilterBand {
    /// Upper edge (exclusive, MHz) of every band but the last, in order.
    const THRESHOLDS: [(i32, FilterBand); 7] = [
        (488, FilterBand::Uhf470To488),
        (512, FilterBand::Uhf488To512),
        (542, FilterBand::Uhf512To542),
        (572, FilterBand::Uhf542To572),
        (608, FilterBand::Uhf572To608),
        (656, FilterBand::Uhf608To656),
        (710, FilterBand::Uhf656To710),
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Self {
        match code & 0x07 {
            0 => FilterBand::Uhf470To488,
            1 => FilterBand::Uhf488To512,
            2 => FilterBand::Uhf512To542,
            3 => FilterBand::Uhf542To572,
            4 => FilterBand::Uhf572To608,
            5 => FilterBand::Uhf608To656,
            6 => FilterBand::Uhf656To710,
            _ => FilterBand::Uhf710To806,
        }
    }
}

impl std::fmt::Display for FilterBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            FilterBand::Uhf470To488 => "470-488MHz",
            FilterBand::Uhf488To512 => "488-512MHz",
            FilterBand::Uhf512To542 => "512-542MHz",
            FilterBand::Uhf542To572 => "542-572MHz",
            FilterBand::Uhf572To608 => "572-608MHz",
            FilterBand::Uhf608To656 => "608-656MHz",
            FilterBand::Uhf656To710 => "656-710MHz",
            FilterBand::Uhf710To806 => "710-806MHz",
        };
        f.write_str(label)
    }
}

/// Power detector buffer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PowerDetector {
    Off = 0,
    OnRfAgc = 1,
    Unused = 2,
    OnGc1 = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfFilter {
    pub band: FilterBand,
    /// RF AGC take-over point code, 0..=7 (-66 dBm .. -52 dBm in 2 dB steps).
    pub agc_threshold: u8,
    pub power_detector: PowerDetector,
}

impl RfFilter {
    pub fn pack(&self) -> Result<u8> {
        let agc = check_field("rf_filter.agc_threshold", self.agc_threshold, 0x07)?;
        Ok(self.band.code() | (agc << 3) | ((self.power_detector as u8) << 6))
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            band: FilterBand::from_code(byte),
            agc_threshold: (byte >> 3) & 0x07,
            power_detector: match (byte >> 6) & 0x03 {
                0 => PowerDetector::Off,
                1 => PowerDetector::OnRfAgc,
                2 => PowerDetector::Unused,
                _ => PowerDetector::OnGc1,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Register 0x04: mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mode {
    /// Factory-use bits 0..=4.
    pub factory: u8,
    pub low_side_injection: bool,
    pub rf_filter_disabled: bool,
    pub rfvga_stage3_disabled: bool,
}

impl Mode {
    pub fn pack(&self) -> Result<u8> {
        let factory = check_field("mode.factory", self.factory, 0x1f)?;
        Ok(factory
            | bit(self.low_side_injection, 5)
            | bit(self.rf_filter_disabled, 6)
            | bit(self.rfvga_stage3_disabled, 7))
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            factory: byte & 0x1f,
            low_side_injection: byte & 0x20 != 0,
            rf_filter_disabled: byte & 0x40 != 0,
            rfvga_stage3_disabled: byte & 0x80 != 0,
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Self {
            factory: 0x1f,
            low_side_injection: false,
            rf_filter_disabled: false,
            rfvga_stage3_disabled: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Registers 0x05/0x06: R divider
// ---------------------------------------------------------------------------

/// Factory bits that must read back as 1 in the R-divider LSB register.
const RDIVIDER_LSB_FACTORY: u8 = 0x22;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RDividerLsb {
    /// Least significant bit of R.
    pub r_lsb: u8,
    /// RF detector attenuation code, 0..=3 (37 dB .. 28 dB).
    pub rf_detector_attenuation: u8,
    pub rf_detector_disabled: bool,
    /// Charge pump current code, 0..=3 (1.5 mA .. 3 mA).
    pub charge_pump: u8,
}

impl RDividerLsb {
    pub fn pack(&self) -> Result<u8> {
        let r_lsb = check_field("rdivider_lsb.r_lsb", self.r_lsb, 0x01)?;
        let atten = check_field(
            "rdivider_lsb.rf_detector_attenuation",
            self.rf_detector_attenuation,
            0x03,
        )?;
        let cp = check_field("rdivider_lsb.charge_pump", self.charge_pump, 0x03)?;
        Ok(r_lsb
            | RDIVIDER_LSB_FACTORY
            | (atten << 2)
            | bit(self.rf_detector_disabled, 4)
            | (cp << 6))
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            r_lsb: byte & 0x01,
            rf_detector_attenuation: (byte >> 2) & 0x03,
            rf_detector_disabled: byte & 0x10 != 0,
            charge_pump: (byte >> 6) & 0x03,
        }
    }
}

// ---------------------------------------------------------------------------
// Registers 0x07/0x08: N divider
// ---------------------------------------------------------------------------

const NDIVIDER_LSB_FACTORY: u8 = 0x08;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NDividerLsb {
    /// Low nibble of N.
    pub n_lsb: u8,
    pub standby: bool,
    pub rfvga_high: bool,
    pub mixer_high: bool,
}

impl NDividerLsb {
    pub fn pack(&self) -> Result<u8> {
        let n_lsb = check_field("ndivider_lsb.n_lsb", self.n_lsb, 0x0f)?;
        Ok(bit(self.standby, 0)
            | bit(self.rfvga_high, 1)
            | bit(self.mixer_high, 2)
            | NDIVIDER_LSB_FACTORY
            | (n_lsb << 4))
    }

    pub fn unpack(byte: u8) -> Self {
        Self {
            n_lsb: (byte >> 4) & 0x0f,
            standby: byte & 0x01 != 0,
            rfvga_high: byte & 0x02 != 0,
            mixer_high: byte & 0x04 != 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Read-only registers
// ---------------------------------------------------------------------------

/// Register 0x09.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub power_cycled: bool,
    pub charge_pump: u8,
    /// VCO tuning voltage ADC, 0..=7.
    pub vtune_adc: u8,
}

impl Status {
    pub fn unpack(byte: u8) -> Self {
        Self {
            power_cycled: byte & 0x01 != 0,
            charge_pump: (byte >> 1) & 0x03,
            vtune_adc: (byte >> 3) & 0x07,
        }
    }

    /// The ADC rails (0 and 7) mean the VCO ran out of tuning range.
    pub fn is_locked(&self) -> bool {
        (1..=6).contains(&self.vtune_adc)
    }
}

/// Register 0x0A.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VasStatus {
    pub vase: bool,
    pub vasa: bool,
    pub vco_subband: u8,
    pub vco_autoselect: u8,
}

impl VasStatus {
    pub fn unpack(byte: u8) -> Self {
        Self {
            vase: byte & 0x01 != 0,
            vasa: byte & 0x02 != 0,
            vco_subband: (byte >> 2) & 0x0f,
            vco_autoselect: (byte >> 6) & 0x03,
        }
    }
}

// ---------------------------------------------------------------------------
// Typed register values
// ---------------------------------------------------------------------------

/// A value for one writable register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterSetting {
    IfFilter(IfFilter),
    Vas(Vas),
    Vco(Vco),
    RfFilter(RfFilter),
    Mode(Mode),
    RDividerMsb(u8),
    RDividerLsb(RDividerLsb),
    NDividerMsb(u8),
    NDividerLsb(NDividerLsb),
}

impl RegisterSetting {
    pub fn register(&self) -> Register {
        match self {
            RegisterSetting::IfFilter(_) => Register::IfFilter,
            RegisterSetting::Vas(_) => Register::Vas,
            RegisterSetting::Vco(_) => Register::Vco,
            RegisterSetting::RfFilter(_) => Register::RfFilter,
            RegisterSetting::Mode(_) => Register::Mode,
            RegisterSetting::RDividerMsb(_) => Register::RDividerMsb,
            RegisterSetting::RDividerLsb(_) => Register::RDividerLsb,
            RegisterSetting::NDividerMsb(_) => Register::NDividerMsb,
            RegisterSetting::NDividerLsb(_) => Register::NDividerLsb,
        }
    }
}

/// Fold the fields of a register into the byte written to the chip.
pub fn pack_register(setting: &RegisterSetting) -> Result<(Register, u8)> {
    let byte = match setting {
        RegisterSetting::IfFilter(v) => v.pack()?,
        RegisterSetting::Vas(v) => v.pack()?,
        RegisterSetting::Vco(v) => v.pack()?,
        RegisterSetting::RfFilter(v) => v.pack()?,
        RegisterSetting::Mode(v) => v.pack()?,
        RegisterSetting::RDividerMsb(v) | RegisterSetting::NDividerMsb(v) => *v,
        RegisterSetting::RDividerLsb(v) => v.pack()?,
        RegisterSetting::NDividerLsb(v) => v.pack()?,
    };
    Ok((setting.register(), byte))
}

/// Split a register byte back into its fields.
pub fn unpack_register(register: Register, byte: u8) -> Result<RegisterSetting> {
    Ok(match register {
        Register::IfFilter => RegisterSetting::IfFilter(IfFilter::unpack(byte)),
        Register::Vas => RegisterSetting::Vas(Vas::unpack(byte)),
        Register::Vco => RegisterSetting::Vco(Vco::unpack(byte)),
        Register::RfFilter => RegisterSetting::RfFilter(RfFilter::unpack(byte)),
        Register::Mode => RegisterSetting::Mode(Mode::unpack(byte)),
        Register::RDividerMsb => RegisterSetting::RDividerMsb(byte),
        Register::RDividerLsb => RegisterSetting::RDividerLsb(RDividerLsb::unpack(byte)),
        Register::NDividerMsb => RegisterSetting::NDividerMsb(byte),
        Register::NDividerLsb => RegisterSetting::NDividerLsb(NDividerLsb::unpack(byte)),
        other => return Err(ProtocolError::UnknownRegister(other.address())),
    })
}

// ---------------------------------------------------------------------------
// PLL arithmetic
// ---------------------------------------------------------------------------

/// PLL reference and integer dividers, range checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DividerPair {
    r: u16,
    n: u16,
}

impl DividerPair {
    pub fn new(r: u16, n: u16) -> Result<Self> {
        check_divider(Divider::Reference, r as i64, R_DIVIDER_MIN, R_DIVIDER_MAX)?;
        check_divider(Divider::Integer, n as i64, N_DIVIDER_MIN, N_DIVIDER_MAX)?;
        Ok(Self { r, n })
    }

    pub fn r(&self) -> u16 {
        self.r
    }

    pub fn n(&self) -> u16 {
        self.n
    }

    pub fn r_msb(&self) -> u8 {
        ((self.r >> 1) & 0xff) as u8
    }

    pub fn r_lsb(&self) -> u8 {
        (self.r & 0x01) as u8
    }

    pub fn n_msb(&self) -> u8 {
        ((self.n >> 4) & 0xff) as u8
    }

    /// Low nibble of N, before it is shifted into bits 4..=7.
    pub fn n_lsb(&self) -> u8 {
        (self.n & 0x0f) as u8
    }

    /// Synthesised frequency in MHz, `N / R * crystal`.
    pub fn frequency_mhz(&self) -> f64 {
        self.n as f64 / self.r as f64 * CRYSTAL_MHZ as f64
    }
}

fn check_divider(divider: Divider, value: i64, min: u16, max: u16) -> Result<()> {
    if value < min as i64 || value > max as i64 {
        return Err(ProtocolError::DividerOutOfRange {
            divider,
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Everything needed to put the PLL on a frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PllSetting {
    pub frequency_mhz: i32,
    pub dividers: DividerPair,
    pub band: FilterBand,
    /// False when nobody is known to broadcast on this frequency. The
    /// setting is still valid; the hardware has no hard limit.
    pub known_broadcaster: bool,
}

/// Compute the PLL dividers for `freq_mhz`.
///
/// `n = (64 + freq * r) / 32`, integer division against the 32 MHz crystal.
pub fn frequency_to_dividers(freq_mhz: i32, reference_divider: u16) -> Result<PllSetting> {
    if freq_mhz < 0 {
        return Err(ProtocolError::UnsupportedFrequency(freq_mhz));
    }
    check_divider(
        Divider::Reference,
        reference_divider as i64,
        R_DIVIDER_MIN,
        R_DIVIDER_MAX,
    )?;

    let n = (N_DIVIDER_OFFSET + freq_mhz as i64 * reference_divider as i64) / CRYSTAL_MHZ;
    if n < N_DIVIDER_MIN as i64 || n > N_DIVIDER_MAX as i64 {
        return Err(ProtocolError::UnsupportedFrequency(freq_mhz));
    }

    Ok(PllSetting {
        frequency_mhz: freq_mhz,
        dividers: DividerPair::new(reference_divider, n as u16)?,
        band: band_for_frequency(freq_mhz),
        known_broadcaster: is_known_frequency(freq_mhz),
    })
}

/// Pick the RF tracking filter band. First threshold that matches wins.
pub fn band_for_frequency(freq_mhz: i32) -> FilterBand {
    FilterBand::THRESHOLDS
        .iter()
        .find(|(upper, _)| freq_mhz < *upper)
        .map(|(_, band)| *band)
        .unwrap_or(FilterBand::Uhf710To806)
}

// ---------------------------------------------------------------------------
// Tuner program
// ---------------------------------------------------------------------------

/// Static tuner settings applied at bring-up. Frequency-dependent fields
/// (filter band, dividers) come from a [`PllSetting`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerProfile {
    pub if_filter: IfFilter,
    pub vas: Vas,
    pub vco: Vco,
    pub agc_threshold: u8,
    pub power_detector: PowerDetector,
    pub mode: Mode,
    pub rf_detector_attenuation: u8,
    pub rf_detector_disabled: bool,
    pub charge_pump: u8,
    pub rfvga_high: bool,
    pub mixer_high: bool,
}

impl Default for TunerProfile {
    fn default() -> Self {
        Self {
            if_filter: IfFilter::default(),
            vas: Vas::default(),
            vco: Vco::default(),
            agc_threshold: 3,
            power_detector: PowerDetector::OnRfAgc,
            mode: Mode::default(),
            rf_detector_attenuation: 0,
            rf_detector_disabled: false,
            charge_pump: 1,
            rfvga_high: false,
            mixer_high: false,
        }
    }
}

impl TunerProfile {
    pub fn rf_filter(&self, band: FilterBand) -> RfFilter {
        RfFilter {
            band,
            agc_threshold: self.agc_threshold,
            power_detector: self.power_detector,
        }
    }

    pub fn rdivider_lsb(&self, dividers: &DividerPair) -> RDividerLsb {
        RDividerLsb {
            r_lsb: dividers.r_lsb(),
            rf_detector_attenuation: self.rf_detector_attenuation,
            rf_detector_disabled: self.rf_detector_disabled,
            charge_pump: self.charge_pump,
        }
    }

    pub fn ndivider_lsb(&self, dividers: &DividerPair) -> NDividerLsb {
        NDividerLsb {
            n_lsb: dividers.n_lsb(),
            standby: false,
            rfvga_high: self.rfvga_high,
            mixer_high: self.mixer_high,
        }
    }

    /// The nine register writes of the bring-up program, in wire order.
    pub fn program(&self, pll: &PllSetting) -> [RegisterSetting; 9] {
        let d = &pll.dividers;
        [
            RegisterSetting::IfFilter(self.if_filter),
            RegisterSetting::Vas(self.vas),
            RegisterSetting::Vco(self.vco),
            RegisterSetting::RfFilter(self.rf_filter(pll.band)),
            RegisterSetting::Mode(self.mode),
            RegisterSetting::RDividerMsb(d.r_msb()),
            RegisterSetting::RDividerLsb(self.rdivider_lsb(d)),
            RegisterSetting::NDividerMsb(d.n_msb()),
            RegisterSetting::NDividerLsb(self.ndivider_lsb(d)),
        ]
    }

    /// The five writes needed to move to another frequency.
    pub fn retune(&self, pll: &PllSetting) -> [RegisterSetting; 5] {
        let d = &pll.dividers;
        [
            RegisterSetting::RfFilter(self.rf_filter(pll.band)),
            RegisterSetting::RDividerMsb(d.r_msb()),
            RegisterSetting::RDividerLsb(self.rdivider_lsb(d)),
            RegisterSetting::NDividerMsb(d.n_msb()),
            RegisterSetting::NDividerLsb(self.ndivider_lsb(d)),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FREQUENCY_TABLE;

    #[test]
    fn test_if_filter_packs_documented_value() {
        let f = IfFilter {
            bandwidth: IfBandwidth::Mhz13,
            bias_current: 0x03,
            filter_select: FilterSelect::Internal,
            center_frequency: IfFilter::CENTER_1_00,
        };
        assert_eq!(f.pack().unwrap(), 0x6f);
        assert_eq!(IfFilter::unpack(0x6f), f);
        assert_eq!(IfFilter::default(), f);
    }

    #[test]
    fn test_pack_unpack_round_trip() {
        let settings = [
            RegisterSetting::IfFilter(IfFilter {
                bandwidth: IfBandwidth::Mhz26,
                bias_current: 1,
                filter_select: FilterSelect::Manual,
                center_frequency: 6,
            }),
            RegisterSetting::Vas(Vas {
                wait_time: 2,
                adc_read: true,
                adc_latch: true,
                cps_automatic: false,
                vco_autoselect: true,
                start_at: 1,
            }),
            RegisterSetting::Vco(Vco {
                vcob_low_power: true,
                sub_band: 11,
                vco: 2,
            }),
            RegisterSetting::RfFilter(RfFilter {
                band: FilterBand::Uhf608To656,
                agc_threshold: 5,
                power_detector: PowerDetector::OnGc1,
            }),
            RegisterSetting::Mode(Mode {
                factory: 0x1f,
                low_side_injection: true,
                rf_filter_disabled: false,
                rfvga_stage3_disabled: true,
            }),
            RegisterSetting::RDividerMsb(0x38),
            RegisterSetting::RDividerLsb(RDividerLsb {
                r_lsb: 1,
                rf_detector_attenuation: 2,
                rf_detector_disabled: true,
                charge_pump: 3,
            }),
            RegisterSetting::NDividerMsb(0x6b),
            RegisterSetting::NDividerLsb(NDividerLsb {
                n_lsb: 0x8,
                standby: false,
                rfvga_high: true,
                mixer_high: true,
            }),
        ];

        for setting in settings {
            let (reg, byte) = pack_register(&setting).unwrap();
            assert_eq!(reg, setting.register());
            assert_eq!(unpack_register(reg, byte).unwrap(), setting, "register {}", reg);
        }
    }

    #[test]
    fn test_documented_bit_values() {
        let vas = Vas {
            wait_time: 3,
            adc_read: false,
            adc_latch: false,
            cps_automatic: true,
            vco_autoselect: true,
            start_at: 1,
        };
        assert_eq!(vas.pack().unwrap(), 0x03 | 0x10 | 0x20 | 0x40);

        let rf = RfFilter {
            band: FilterBand::Uhf710To806,
            agc_threshold: 7,
            power_detector: PowerDetector::OnRfAgc,
        };
        assert_eq!(rf.pack().unwrap(), 0x07 | 0x38 | 0x40);

        let lsb = RDividerLsb {
            r_lsb: 0,
            rf_detector_attenuation: 3,
            rf_detector_disabled: false,
            charge_pump: 2,
        };
        assert_eq!(lsb.pack().unwrap(), 0x02 | 0x20 | 0x0c | 0x80);
    }

    #[test]
    fn test_pack_rejects_out_of_range_fields() {
        let vco = Vco {
            vcob_low_power: false,
            sub_band: 16,
            vco: 0,
        };
        let err = vco.pack().unwrap_err();
        assert!(matches!(
            err,
            ProtocolError::FieldOutOfRange {
                field: "vco.sub_band",
                value: 16,
                max: 15
            }
        ));
        assert!(err.is_invalid_argument());

        let mode = Mode {
            factory: 0x20,
            ..Mode::default()
        };
        assert!(mode.pack().is_err());

        let vco = Vco {
            vco: 3,
            ..Vco::default()
        };
        assert!(vco.pack().is_err());
    }

    #[test]
    fn test_unpack_rejects_non_writable_registers() {
        assert_eq!(
            unpack_register(Register::Status, 0).unwrap_err(),
            ProtocolError::UnknownRegister(0x09)
        );
        assert!(unpack_register(Register::Reserved(0x0c), 0).is_err());
        assert!(unpack_register(Register::Probe(0x80), 0).is_err());
    }

    #[test]
    fn test_register_address_round_trip() {
        for addr in 0u8..=0xff {
            assert_eq!(Register::from(addr).address(), addr);
        }
        assert_eq!(Register::from(0x11), Register::Reserved(0x11));
        assert_eq!(Register::from(0x16), Register::Probe(0x16));
        assert!(Register::Status.is_read_only());
        assert_eq!(Register::Mode.mask(), 0xe0);
    }

    #[test]
    fn test_tune_491_mhz() {
        let pll = frequency_to_dividers(491, 0x70).unwrap();
        assert_eq!(pll.dividers.n(), 1720);
        assert_eq!(pll.dividers.r(), 112);
        assert_eq!(pll.band, FilterBand::Uhf488To512);
        assert_eq!(pll.band.to_string(), "488-512MHz");
        assert!(pll.known_broadcaster);

        assert_eq!(pll.dividers.r_msb(), 56);
        assert_eq!(pll.dividers.r_lsb(), 0);
        assert_eq!(pll.dividers.n_msb(), (1720 >> 4) as u8);
        assert_eq!(pll.dividers.n_lsb(), (1720 & 0x0f) as u8);
    }

    #[test]
    fn test_dividers_within_range_across_table() {
        for r in R_DIVIDER_MIN..=R_DIVIDER_MAX {
            for &f in FREQUENCY_TABLE.iter() {
                if let Ok(pll) = frequency_to_dividers(f as i32, r) {
                    let n = pll.dividers.n();
                    assert!(
                        (N_DIVIDER_MIN..=N_DIVIDER_MAX).contains(&n),
                        "f={} r={} n={}",
                        f,
                        r,
                        n
                    );
                    assert!((R_DIVIDER_MIN..=R_DIVIDER_MAX).contains(&pll.dividers.r()));
                    // The +64 offset biases the synthesised frequency upward by at most 64/R.
                    let offset = pll.dividers.frequency_mhz() - f as f64;
                    assert!(offset > 0.0 && offset <= 64.0 / r as f64 + 1e-9, "f={} r={}", f, r);
                }
            }
        }
        // A divider that keeps the whole table in range.
        for &f in FREQUENCY_TABLE.iter() {
            assert!(frequency_to_dividers(f as i32, 96).is_ok(), "f={}", f);
        }
    }

    #[test]
    fn test_default_divider_misses_top_channels() {
        let rejected: Vec<u16> = FREQUENCY_TABLE
            .iter()
            .copied()
            .filter(|&f| frequency_to_dividers(f as i32, DEFAULT_REFERENCE_DIVIDER).is_err())
            .collect();
        assert_eq!(rejected, vec![773, 779, 785, 791, 797, 803]);
        assert_eq!(
            frequency_to_dividers(803, DEFAULT_REFERENCE_DIVIDER).unwrap_err(),
            ProtocolError::UnsupportedFrequency(803)
        );
    }

    #[test]
    fn test_unlisted_frequency_is_advisory() {
        let pll = frequency_to_dividers(500, 0x70).unwrap();
        assert!(!pll.known_broadcaster);
    }

    #[test]
    fn test_unsupported_frequencies() {
        assert_eq!(
            frequency_to_dividers(-1, 0x70).unwrap_err(),
            ProtocolError::UnsupportedFrequency(-1)
        );
        assert_eq!(
            frequency_to_dividers(100, 0x70).unwrap_err(),
            ProtocolError::UnsupportedFrequency(100)
        );
        assert_eq!(
            frequency_to_dividers(803, 0x70).unwrap_err(),
            ProtocolError::UnsupportedFrequency(803)
        );
        assert!(matches!(
            frequency_to_dividers(491, 15).unwrap_err(),
            ProtocolError::DividerOutOfRange {
                divider: Divider::Reference,
                ..
            }
        ));
    }

    #[test]
    fn test_band_thresholds() {
        assert_eq!(band_for_frequency(473), FilterBand::Uhf470To488);
        assert_eq!(band_for_frequency(487), FilterBand::Uhf470To488);
        assert_eq!(band_for_frequency(488), FilterBand::Uhf488To512);
        assert_eq!(band_for_frequency(541), FilterBand::Uhf512To542);
        assert_eq!(band_for_frequency(557), FilterBand::Uhf542To572);
        assert_eq!(band_for_frequency(605), FilterBand::Uhf572To608);
        assert_eq!(band_for_frequency(653), FilterBand::Uhf608To656);
        assert_eq!(band_for_frequency(707), FilterBand::Uhf656To710);
        assert_eq!(band_for_frequency(710), FilterBand::Uhf710To806);
        assert_eq!(band_for_frequency(803), FilterBand::Uhf710To806);
    }

    #[test]
    fn test_status_lock_detection() {
        assert!(Status::unpack(0b0001_1000).is_locked());
        assert!(!Status::unpack(0b0000_0000).is_locked());
        assert!(!Status::unpack(0b0011_1000).is_locked());
        let s = Status::unpack(0b0010_0101);
        assert!(s.power_cycled);
        assert_eq!(s.charge_pump, 2);
        assert_eq!(s.vtune_adc, 4);

        let vas = VasStatus::unpack(0b1101_0110);
        assert!(!vas.vase);
        assert!(vas.vasa);
        assert_eq!(vas.vco_subband, 0b0101);
        assert_eq!(vas.vco_autoselect, 0b11);
    }

    #[test]
    fn test_program_order_matches_registers() {
        let pll = frequency_to_dividers(491, 0x70).unwrap();
        let program = TunerProfile::default().program(&pll);
        let regs: Vec<Register> = program.iter().map(|s| s.register()).collect();
        assert_eq!(regs, Register::PROGRAM_ORDER.to_vec());

        let retune = TunerProfile::default().retune(&pll);
        let regs: Vec<Register> = retune.iter().map(|s| s.register()).collect();
        assert_eq!(regs, Register::RETUNE_ORDER.to_vec());
    }
}

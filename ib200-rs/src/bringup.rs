//! Device bring-up.
//!
//! A fixed, linear sequence of steps. The device does not tolerate partial
//! programming, so the first failure aborts the whole sequence and the
//! session has to be reopened from scratch.

use std::time::Duration;

use log::{debug, info};

use ib200_protocol::types::{
    ALT_SETTING_IDLE, ALT_SETTING_STREAMING, FINALIZATION_POKE, LED_ON, PRIMING_DELAY_MS,
    PRIMING_WRITE, STREAMING_ALT_DELAY_MS, UNDOCUMENTED_SWEEP,
};
use ib200_protocol::{BringupVariant, Firmware, PllSetting, Register, TunerProfile};

use crate::control::{hex, ControlChannel};
use crate::error::{DeviceError, Result};
use crate::transport::UsbTransport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringupStep {
    ClaimInterface,
    SelectZeroBandwidthAltSetting,
    ConfigurationProbe,
    EndpointPriming,
    TunerRegisterProgram,
    UndocumentedRegisterSweep,
    FirmwareBlobUpload,
    SelectStreamingAltSetting,
    FinalizationPoke,
}

impl BringupStep {
    pub const ALL: [BringupStep; 9] = [
        BringupStep::ClaimInterface,
        BringupStep::SelectZeroBandwidthAltSetting,
        BringupStep::ConfigurationProbe,
        BringupStep::EndpointPriming,
        BringupStep::TunerRegisterProgram,
        BringupStep::UndocumentedRegisterSweep,
        BringupStep::FirmwareBlobUpload,
        BringupStep::SelectStreamingAltSetting,
        BringupStep::FinalizationPoke,
    ];

    /// 1-based position in the sequence.
    pub fn number(self) -> usize {
        Self::ALL.iter().position(|s| *s == self).map_or(0, |i| i + 1)
    }
}

impl std::fmt::Display for BringupStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BringupStep::ClaimInterface => "claim interface",
            BringupStep::SelectZeroBandwidthAltSetting => "select zero-bandwidth alt setting",
            BringupStep::ConfigurationProbe => "configuration probe",
            BringupStep::EndpointPriming => "endpoint priming",
            BringupStep::TunerRegisterProgram => "tuner register program",
            BringupStep::UndocumentedRegisterSweep => "undocumented register sweep",
            BringupStep::FirmwareBlobUpload => "firmware upload",
            BringupStep::SelectStreamingAltSetting => "select streaming alt setting",
            BringupStep::FinalizationPoke => "finalization poke",
        };
        f.write_str(name)
    }
}

/// Inputs of one bring-up run.
#[derive(Debug, Clone, Copy)]
pub struct BringupPlan<'a> {
    pub configuration: u8,
    pub interface: u8,
    pub variant: BringupVariant,
    pub profile: &'a TunerProfile,
    /// Frequency programmed by the initial register program.
    pub pll: PllSetting,
    pub firmware: &'a Firmware,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BringupReport {
    /// Raw replies of every configuration probe, in order.
    pub probes: Vec<[u8; 2]>,
    /// Register bytes written by the tuner program, in wire order.
    pub registers: Vec<(Register, u8)>,
}

/// Run the sequence. Any error is wrapped with the step that produced it.
pub fn run<T: UsbTransport>(
    channel: &mut ControlChannel<T>,
    plan: &BringupPlan<'_>,
) -> Result<BringupReport> {
    let mut report = BringupReport::default();

    for step in BringupStep::ALL {
        info!("Bring-up [{}/{}] {}", step.number(), BringupStep::ALL.len(), step);
        run_step(channel, plan, step, &mut report).map_err(|e| DeviceError::Bringup {
            step,
            source: Box::new(e),
        })?;
    }

    info!("Bring-up complete ({})", plan.variant);
    Ok(report)
}

fn run_step<T: UsbTransport>(
    channel: &mut ControlChannel<T>,
    plan: &BringupPlan<'_>,
    step: BringupStep,
    report: &mut BringupReport,
) -> Result<()> {
    match step {
        BringupStep::ClaimInterface => {
            let transport = channel.transport_mut();
            transport.set_configuration(plan.configuration)?;
            transport.claim_interface(plan.interface)?;
        }
        BringupStep::SelectZeroBandwidthAltSetting => {
            channel
                .transport_mut()
                .set_alternate_setting(plan.interface, ALT_SETTING_IDLE)?;
        }
        BringupStep::ConfigurationProbe => {
            probe(channel, report)?;
        }
        BringupStep::EndpointPriming => match plan.variant {
            BringupVariant::LedAndVendorWrite => {
                channel.vendor_command(&LED_ON)?;
                channel.vendor_command(&PRIMING_WRITE)?;
                pause(PRIMING_DELAY_MS);
            }
            BringupVariant::ProbeReadback => {
                probe(channel, report)?;
                channel.vendor_command(&PRIMING_WRITE)?;
                probe(channel, report)?;
            }
        },
        BringupStep::TunerRegisterProgram => {
            for setting in plan.profile.program(&plan.pll) {
                let byte = channel.program_register(&setting, true)?;
                debug!("{} <- 0x{:02x}", setting.register(), byte);
                report.registers.push((setting.register(), byte));
            }
        }
        BringupStep::UndocumentedRegisterSweep => {
            for write in UNDOCUMENTED_SWEEP {
                let register = Register::from(write.register);
                channel.i2c_write(register, write.value, write.trailer)?;
                if write.shadow {
                    channel.shadow_write(register, write.trailer)?;
                }
            }
        }
        BringupStep::FirmwareBlobUpload => {
            for chunk in plan.firmware.chunks() {
                channel.firmware_chunk(chunk)?;
            }
        }
        BringupStep::SelectStreamingAltSetting => {
            channel
                .transport_mut()
                .set_alternate_setting(plan.interface, ALT_SETTING_STREAMING)?;
            pause(STREAMING_ALT_DELAY_MS);
        }
        BringupStep::FinalizationPoke => {
            channel.vendor_command(&FINALIZATION_POKE)?;
        }
    }
    Ok(())
}

fn probe<T: UsbTransport>(
    channel: &mut ControlChannel<T>,
    report: &mut BringupReport,
) -> Result<()> {
    let reply = channel.probe()?;
    info!("Configuration probe: {}", hex(&reply));
    report.probes.push(reply);
    Ok(())
}

fn pause(ms: u64) {
    std::thread::sleep(Duration::from_millis(ms));
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::transport::mock::{MockTransport, Op};
    use ib200_protocol::types::{
        FIRMWARE_UPLOAD_ADDRESS, I2C_BRIDGE_ADDRESS, SHADOW_ADDRESS, VENDOR_ADDRESS,
    };
    use ib200_protocol::{frequency_to_dividers, CommandFrame, FIRMWARE_SIZE};

    pub(crate) fn test_firmware() -> Firmware {
        let image: Vec<u8> = (0..FIRMWARE_SIZE as u8).map(|b| b ^ 0xa5).collect();
        Firmware::from_bytes(&image).unwrap()
    }

    fn run_with(
        variant: BringupVariant,
        transport: MockTransport,
    ) -> (ControlChannel<MockTransport>, Result<BringupReport>) {
        let mut channel = ControlChannel::new(transport).with_settle_delay(Duration::ZERO);
        let profile = TunerProfile::default();
        let firmware = test_firmware();
        let plan = BringupPlan {
            configuration: 1,
            interface: 0,
            variant,
            profile: &profile,
            pll: frequency_to_dividers(491, 0x70).unwrap(),
            firmware: &firmware,
        };
        let result = run(&mut channel, &plan);
        (channel, result)
    }

    fn i2c_register(frame: &CommandFrame) -> Option<u8> {
        (frame.address() == I2C_BRIDGE_ADDRESS).then(|| frame.payload()[1])
    }

    #[test]
    fn test_full_sequence_order() {
        let (channel, result) = run_with(BringupVariant::LedAndVendorWrite, MockTransport::new());
        let report = result.unwrap();
        assert_eq!(report.probes.len(), 1);
        assert_eq!(report.registers.len(), 9);

        let ops = channel.transport().ops();
        assert_eq!(ops[0], Op::SetConfiguration(1));
        assert_eq!(ops[1], Op::ClaimInterface(0));
        assert_eq!(ops[2], Op::SetAlternateSetting(0, 0));
        assert!(ops[3].is_probe());

        let frames = channel.transport().frames();
        // LED, priming, 9 x (write + shadow), 6 sweep writes + 5 shadows,
        // 28 firmware chunks, finalization.
        assert_eq!(frames.len(), 2 + 18 + 11 + 28 + 1);
        assert_eq!(frames[0].address(), VENDOR_ADDRESS);
        assert_eq!(frames[1].trailer(), PRIMING_WRITE.trailer);

        let program: Vec<u8> = frames[2..20].iter().filter_map(i2c_register).collect();
        let expected: Vec<u8> = Register::PROGRAM_ORDER.iter().map(|r| r.address()).collect();
        assert_eq!(program, expected);
        for pair in frames[2..20].chunks(2) {
            assert_eq!(pair[1].address(), SHADOW_ADDRESS);
            assert_eq!(pair[1].payload()[0], pair[0].payload()[1]);
            assert_eq!(pair[1].trailer(), pair[0].trailer());
        }

        let sweep = &frames[20..31];
        assert_eq!(sweep.iter().filter(|f| f.address() == SHADOW_ADDRESS).count(), 5);
        assert_eq!(i2c_register(&sweep[10]), Some(0x16));

        let firmware = &frames[31..59];
        assert!(firmware.iter().all(|f| f.address() == FIRMWARE_UPLOAD_ADDRESS));
        assert_eq!(&firmware[0].payload()[..2], &test_firmware().as_bytes()[..2]);

        assert_eq!(
            frames[59].as_bytes(),
            ib200_protocol::encode_vendor_command(&FINALIZATION_POKE).as_bytes()
        );

        let alt_pos = ops.iter().position(|op| *op == Op::SetAlternateSetting(0, 1)).unwrap();
        let last_chunk_pos = ops
            .iter()
            .rposition(|op| op.frame().map_or(false, |f| f.address() == FIRMWARE_UPLOAD_ADDRESS))
            .unwrap();
        assert!(alt_pos > last_chunk_pos);
        assert_eq!(ops.last().and_then(Op::frame).unwrap().trailer(), FINALIZATION_POKE.trailer);
    }

    #[test]
    fn test_probe_readback_variant() {
        let (channel, result) = run_with(BringupVariant::ProbeReadback, MockTransport::new());
        let report = result.unwrap();
        assert_eq!(report.probes.len(), 3);

        let ops = channel.transport().ops();
        assert!(ops[3].is_probe());
        assert!(ops[4].is_probe());
        assert_eq!(ops[5].frame().unwrap().trailer(), PRIMING_WRITE.trailer);
        assert!(ops[6].is_probe());
        // No LED command in this variant.
        assert!(channel
            .transport()
            .frames()
            .iter()
            .all(|f| f.trailer() != LED_ON.trailer));
    }

    #[test]
    fn test_abort_at_mode_register() {
        let transport = MockTransport::new();
        transport.fail_nth(0, |op| {
            op.frame().map_or(false, |f| {
                f.address() == I2C_BRIDGE_ADDRESS && f.payload()[1] == Register::Mode.address()
            })
        });
        let (channel, result) = run_with(BringupVariant::LedAndVendorWrite, transport);

        match result.unwrap_err() {
            DeviceError::Bringup { step, source } => {
                assert_eq!(step, BringupStep::TunerRegisterProgram);
                assert!(source.is_transport());
            }
            other => panic!("unexpected error: {}", other),
        }

        let registers: Vec<u8> = channel
            .transport()
            .frames()
            .iter()
            .filter_map(i2c_register)
            .collect();
        assert_eq!(registers, vec![0x00, 0x01, 0x02, 0x03, 0x04]);
        let ops = channel.transport().ops();
        assert!(!ops.contains(&Op::SetAlternateSetting(0, 1)));
        assert!(channel
            .transport()
            .frames()
            .iter()
            .all(|f| f.address() != FIRMWARE_UPLOAD_ADDRESS));
    }

    #[test]
    fn test_abort_at_claim() {
        let transport = MockTransport::new();
        transport.fail_nth(0, |op| matches!(op, Op::ClaimInterface(_)));
        let (channel, result) = run_with(BringupVariant::LedAndVendorWrite, transport);
        assert!(matches!(
            result.unwrap_err(),
            DeviceError::Bringup {
                step: BringupStep::ClaimInterface,
                ..
            }
        ));
        assert_eq!(channel.transport().ops().len(), 2);
    }

    #[test]
    fn test_step_numbers() {
        assert_eq!(BringupStep::ClaimInterface.number(), 1);
        assert_eq!(BringupStep::TunerRegisterProgram.number(), 5);
        assert_eq!(BringupStep::FinalizationPoke.number(), 9);
    }
}

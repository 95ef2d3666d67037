use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand};
use clap_num::maybe_hex;

#[derive(Debug, Parser)]
#[clap(name = "ib200")]
#[clap(about = "ib200 drives the Zinwell IB-200 ISDB-T 1seg USB tuner. ", long_about = None)]
#[clap(author = "maleicacid")]
#[clap(version)]
pub(crate) struct Cli {
    /// Configuration file.{n}
    /// If not specified, `ib200.toml` in the working directory
    /// is used when present.
    #[clap(short = 'f', long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug logging.
    #[clap(short, long, global = true)]
    pub verbose: bool,

    /// USB vendor id of the device (hex accepted).
    #[clap(long, global = true, value_parser = maybe_hex::<u16>)]
    pub vendor_id: Option<u16>,

    /// USB product id of the device (hex accepted).
    #[clap(long, global = true, value_parser = maybe_hex::<u16>)]
    pub product_id: Option<u16>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Initialize the device.{n}
    /// Runs the full bring-up sequence: interface claim, endpoint
    /// priming, tuner register program, firmware upload and
    /// streaming alt setting.
    Init {
        /// The firmware image.{n}
        /// A 56-byte image extracted with `extract-firmware`.
        /// Overrides `bringup.firmware` in the configuration file.
        #[clap(long, value_name = "FILE")]
        firmware: Option<PathBuf>,
    },

    /// Tune to a frequency.{n}
    /// The device is initialized first.{n}
    /// Frequencies without a known broadcaster are accepted
    /// with a warning.
    #[clap(group(
    ArgGroup::new("target")
    .args(& ["frequency", "channel"])
    .required(true)
    ))]
    Tune {
        /// Centre frequency in MHz.
        #[clap(long, allow_hyphen_values = true)]
        frequency: Option<i32>,

        /// UHF physical channel (14-69).{n}
        /// Channels 63-69 need `tuner.reference_divider = 96`; the
        /// default divider 0x70 cannot reach them.
        #[clap(short, long)]
        channel: Option<u8>,

        /// The firmware image.
        #[clap(long, value_name = "FILE")]
        firmware: Option<PathBuf>,
    },

    /// Signal test.{n}
    /// This subcommand reads the tuner status register
    /// and reports whether the PLL is locked.
    #[clap(name = "checksignal")]
    Checksignal {
        /// Centre frequency in MHz to tune to before checking.
        #[clap(long)]
        frequency: Option<i32>,

        /// UHF physical channel (14-69).
        #[clap(short, long, conflicts_with = "frequency")]
        channel: Option<u8>,

        /// The firmware image.
        #[clap(long, value_name = "FILE")]
        firmware: Option<PathBuf>,
    },

    /// Record the transport stream.{n}
    /// The device is initialized, tuned and streamed into
    /// the output until Ctrl-C or the duration is over.
    Record {
        /// Centre frequency in MHz.
        #[clap(long)]
        frequency: Option<i32>,

        /// UHF physical channel (14-69).
        #[clap(short, long, conflicts_with = "frequency")]
        channel: Option<u8>,

        /// The duration of the recording.{n}
        /// The duration is specified in seconds.
        /// If the duration is not specified, the recording will
        /// continue until the user stops it.
        #[clap(short, long, value_name = "seconds")]
        time: Option<f64>,

        /// The firmware image.
        #[clap(long, value_name = "FILE")]
        firmware: Option<PathBuf>,

        /// The location of the output.{n}
        /// If '-' is specified, the recording will be redirected to
        /// stdout.
        #[clap(required = true)]
        output: String,
    },

    /// Blink the front LED.
    Blink {
        /// Number of blinks.
        #[clap(short = 'n', long, default_value = "3")]
        times: u32,
    },

    /// Extract the firmware image from the vendor Windows driver.{n}
    /// Searches the driver (e.g. `ZTUB10.sys`) for the firmware
    /// signature and writes the 56 bytes that follow it.
    #[clap(name = "extract-firmware")]
    ExtractFirmware {
        /// The vendor driver.
        #[clap(required = true)]
        driver: PathBuf,

        /// Where to write the firmware image.
        #[clap(required = true)]
        output: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_record() {
        let cli = Cli::parse_from(["ib200", "record", "--channel", "17", "-t", "30", "out.ts"]);
        match cli.command {
            Commands::Record {
                channel,
                time,
                output,
                ..
            } => {
                assert_eq!(channel, Some(17));
                assert_eq!(time, Some(30.0));
                assert_eq!(output, "out.ts");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_hex_ids() {
        let cli = Cli::parse_from(["ib200", "--vendor-id", "0x5a57", "blink"]);
        assert_eq!(cli.vendor_id, Some(0x5a57));
    }

    #[test]
    fn test_tune_requires_target() {
        assert!(Cli::try_parse_from(["ib200", "tune"]).is_err());
        assert!(
            Cli::try_parse_from(["ib200", "tune", "--frequency", "491", "--channel", "17"])
                .is_err()
        );
        assert!(Cli::try_parse_from(["ib200", "tune", "--frequency", "491"]).is_ok());
    }
}

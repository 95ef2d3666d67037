use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};

use ib200::config::Config;
use ib200::logging::{init_logging, level_from};
use ib200::{open_device, DeviceError, DeviceSession, UsbDeviceTransport};
use ib200_protocol::{frequency_for_channel, Firmware, ProtocolError};

use crate::context::Commands;

mod context;

type Session = DeviceSession<UsbDeviceTransport>;

fn main() {
    let arg = context::Cli::parse();

    let (config, config_path) = match Config::discover(arg.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}", e.to_string().red());
            std::process::exit(2);
        }
    };

    let level = level_from(arg.verbose, config.logging.level.as_deref());
    if let Err(e) = init_logging(level, config.logging.file.as_deref()) {
        eprintln!("Failed to initialize logging: {}", e);
    }
    if let Some(path) = config_path {
        info!("Loaded config from: {}", path.display());
    }

    if let Err(e) = run(arg, config) {
        error!("{}", e);
        eprintln!("{}", e.to_string().red().bold());
        std::process::exit(1);
    }
}

fn run(arg: context::Cli, mut config: Config) -> Result<(), DeviceError> {
    // Command line takes precedence over the config file.
    if let Some(vid) = arg.vendor_id {
        config.device.vendor_id = vid;
    }
    if let Some(pid) = arg.product_id {
        config.device.product_id = pid;
    }

    match arg.command {
        Commands::ExtractFirmware { driver, output } => extract_firmware(&driver, &output),
        Commands::Blink { times } => {
            let mut session = open_session(&config)?;
            session.blink_indicator(times)?;
            session.close()?;
            Ok(())
        }
        Commands::Init { firmware } => {
            let session = init_session(&config, firmware)?;
            eprintln!("{}", "Device initialized.".green());
            session.close()?;
            Ok(())
        }
        Commands::Tune {
            frequency,
            channel,
            firmware,
        } => {
            let mut session = init_session(&config, firmware)?;
            let freq = resolve_frequency(frequency, channel)?
                .unwrap_or(config.tuner.initial_frequency);
            tune(&mut session, freq)?;
            session.close()?;
            Ok(())
        }
        Commands::Checksignal {
            frequency,
            channel,
            firmware,
        } => {
            let mut session = init_session(&config, firmware)?;
            if let Some(freq) = resolve_frequency(frequency, channel)? {
                tune(&mut session, freq)?;
            }
            let signal = session.check_signal()?;
            if signal.is_locked() {
                println!("{} (status 0x{:02x})", "Locked".green().bold(), signal.raw);
            } else {
                println!("{} (status 0x{:02x})", "No lock".red().bold(), signal.raw);
            }
            session.close()?;
            Ok(())
        }
        Commands::Record {
            frequency,
            channel,
            time,
            firmware,
            output,
        } => {
            let mut session = init_session(&config, firmware)?;
            if let Some(freq) = resolve_frequency(frequency, channel)? {
                tune(&mut session, freq)?;
            }
            let duration = time.filter(|t| *t > 0.0).map(Duration::from_secs_f64);
            record(&mut session, &output, duration)?;
            session.close()?;
            Ok(())
        }
    }
}

fn extract_firmware(driver: &Path, output: &Path) -> Result<(), DeviceError> {
    let image = std::fs::read(driver)?;
    let (firmware, offset) = Firmware::extract_from_driver(&image)?;
    std::fs::write(output, firmware.as_bytes())?;
    eprintln!(
        "Found the firmware at offset {}, written to {}",
        offset,
        output.display().to_string().green()
    );
    Ok(())
}

fn open_session(config: &Config) -> Result<Session, DeviceError> {
    let transport = open_device(config.device.vendor_id, config.device.product_id)?;
    Ok(DeviceSession::open(transport, config.session_config()))
}

fn load_firmware(config: &Config, cli: Option<PathBuf>) -> Result<Firmware, DeviceError> {
    let path = cli.or_else(|| config.bringup.firmware.clone()).ok_or_else(|| {
        DeviceError::Config(
            "no firmware image given, extract one with `ib200 extract-firmware <driver.sys> <out>` \
             and pass it with --firmware"
                .to_string(),
        )
    })?;
    let raw = std::fs::read(&path)
        .map_err(|e| DeviceError::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Firmware::from_bytes(&raw)?)
}

fn init_session(config: &Config, firmware: Option<PathBuf>) -> Result<Session, DeviceError> {
    let firmware = load_firmware(config, firmware)?;
    let mut session = open_session(config)?;
    session.initialize(&firmware)?;
    Ok(session)
}

fn resolve_frequency(
    frequency: Option<i32>,
    channel: Option<u8>,
) -> Result<Option<i32>, DeviceError> {
    match (frequency, channel) {
        (Some(f), _) => Ok(Some(f)),
        (None, Some(ch)) => frequency_for_channel(ch)
            .map(|f| Some(i32::from(f)))
            .ok_or_else(|| DeviceError::Config(format!("unknown UHF channel {}", ch))),
        (None, None) => Ok(None),
    }
}

fn tune(session: &mut Session, freq: i32) -> Result<(), DeviceError> {
    let report = session.tune(freq).map_err(|e| {
        if matches!(e, DeviceError::Protocol(ProtocolError::UnsupportedFrequency(_))) {
            eprintln!(
                "{}",
                "hint: frequencies above 767 MHz need `reference_divider = 96` in [tuner]"
                    .yellow()
            );
        }
        e
    })?;
    let channel = report
        .channel
        .map_or_else(|| "-".to_string(), |c| c.to_string());
    eprintln!(
        "Tuned to {} MHz (channel {}, band {})",
        freq.to_string().bold(),
        channel,
        report.pll.band
    );
    Ok(())
}

fn record(
    session: &mut Session,
    output: &str,
    duration: Option<Duration>,
) -> Result<(), DeviceError> {
    let sink: Box<dyn Write> = if output == "-" {
        Box::new(std::io::stdout().lock())
    } else {
        let path = Path::new(output);
        if path.is_dir() {
            return Err(DeviceError::Config(format!("{} is a directory", output)));
        }
        Box::new(BufWriter::new(File::create(path)?))
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            info!("Interrupted, draining outstanding transfers");
            stop.store(true, Ordering::SeqCst);
        })
        .map_err(|e| DeviceError::Config(format!("failed to install Ctrl-C handler: {}", e)))?;
    }

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template(
            "{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    progress.enable_steady_tick(Duration::from_millis(200));

    let mut sink = progress.wrap_write(sink);
    let stats = session.start_streaming(&mut sink, &stop, duration)?;
    progress.finish_and_clear();

    eprintln!(
        "Recorded {} bytes ({} transfers, {} failed, {} empty, packet size {})",
        stats.bytes_delivered.to_string().green(),
        stats.transfers_completed,
        stats.transfers_failed,
        stats.empty_transfers,
        stats.packet_size
    );
    Ok(())
}

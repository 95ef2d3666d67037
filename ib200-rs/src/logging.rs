//! Logger setup.
//!
//! Console output goes to stderr so that `record -` can stream to stdout.
//! An optional log file receives the same records in append mode.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use chrono::Local;
use env_logger::{Builder, Env, Target};
use log::LevelFilter;

/// Duplicates every record into a file.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Resolve the level: `--verbose` wins, then the config file, then `info`.
/// `RUST_LOG` still overrides all of them.
pub fn level_from(verbose: bool, configured: Option<&str>) -> LevelFilter {
    if verbose {
        return LevelFilter::Debug;
    }
    configured
        .and_then(|s| s.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

pub fn init_logging(level: LevelFilter, file: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::from_env(Env::default().default_filter_or(level.as_str()));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{} {:<5} {}] {}",
            Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
            record.level(),
            record.target(),
            record.args()
        )
    });

    match file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.target(Target::Pipe(Box::new(Tee { file })));
        }
        None => {
            builder.target(Target::Stderr);
        }
    }

    builder
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}

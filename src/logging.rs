use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const DEFAULT_FILTER: &str = "pose_coach=info";

/// Logs to stderr and to `<dir>/pose_coach_<timestamp>.log`.
///
/// `RUST_LOG` overrides the default filter. Returns the log file path.
pub fn init<P: AsRef<Path>>(dir: P) -> Result<PathBuf> {
    fs::create_dir_all(dir.as_ref())
        .with_context(|| format!("failed to create {}", dir.as_ref().display()))?;
    let path = dir.as_ref().join(log_file_name(chrono::Local::now()));
    let file = fs::File::create(&path)
        .with_context(|| format!("failed to create {}", path.display()))?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .try_init()
        .context("logger already initialized")?;

    Ok(path)
}

fn log_file_name<Tz: chrono::TimeZone>(now: chrono::DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("pose_coach_{}.log", now.format("%Y%m%d_%H%M%S"))
}

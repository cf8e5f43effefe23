use crate::infrastructure::error::InfraError;
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

pub const LOG_ENV: &str = "WORKTIME_LOG";
const COMMAND_LOG_FILE: &str = "commands.log";

/// Keeps the file writer flushing until dropped.
pub struct LogGuard {
    _file: WorkerGuard,
}

/// Human readable events on stderr (`WORKTIME_LOG`, default `warn`) plus JSON lines
/// at `info` and above appended to `logs/commands.log`.
pub fn init_logging(logs_dir: &Path) -> Result<LogGuard, InfraError> {
    let stderr_filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(stderr_filter);

    let appender = tracing_appender::rolling::never(logs_dir, COMMAND_LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_filter(LevelFilter::INFO);

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|error| InfraError::InvalidConfig(format!("failed to install logger: {error}")))?;

    Ok(LogGuard { _file: guard })
}

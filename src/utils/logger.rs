//! Logging configuration for the Redfire B2BUA

use std::path::Path;

use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::{LogFormat, LoggingConfig};
use crate::{Error, Result};

/// Keeps the file writer flushing; hold it for the life of the process
#[must_use]
pub struct LogGuard {
    _file: Option<WorkerGuard>,
}

/// Setup logging based on configuration
pub fn setup_logging(config: &LoggingConfig) -> Result<LogGuard> {
    let level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    let (file_layer, guard) = match &config.file {
        Some(file_path) => {
            let file_path = Path::new(file_path);
            let directory = file_path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let filename = file_path
                .file_name()
                .ok_or_else(|| Error::parse(format!("Invalid log file path: {}", file_path.display())))?;

            let file_appender = rolling::RollingFileAppender::builder()
                .rotation(rolling::Rotation::DAILY)
                .filename_prefix(filename.to_string_lossy())
                .build(directory)
                .map_err(|e| Error::internal(format!("Failed to create file appender: {}", e)))?;
            let (file_writer, guard) = non_blocking(file_appender);

            // Files never carry ANSI colours
            let layer = match config.format {
                LogFormat::Json => fmt::layer().json().with_writer(file_writer).boxed(),
                LogFormat::Compact => fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .with_writer(file_writer)
                    .boxed(),
                LogFormat::Full => fmt::layer().with_ansi(false).with_writer(file_writer).boxed(),
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_layer = match config.format {
        LogFormat::Json => fmt::layer().json().with_writer(std::io::stdout).boxed(),
        LogFormat::Compact => fmt::layer().compact().with_writer(std::io::stdout).boxed(),
        LogFormat::Full => fmt::layer().with_writer(std::io::stdout).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| Error::internal(format!("Failed to install logger: {}", e)))?;

    info!("Logging initialized with level: {}", config.level);
    Ok(LogGuard { _file: guard })
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::parse(format!("Invalid log level: {}", other))),
    }
}

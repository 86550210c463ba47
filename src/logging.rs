//! Logging setup for feedmail.
//!
//! Log lines go to stdout and to a rolling file in the configured directory.
//! Files are named `<prefix>.<period>.log` (for example
//! `feedmail.2024-01-31.log` with daily rotation) and old ones are pruned
//! once `max_files` is exceeded.

use std::fs;
use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::{FeedmailError, Result};

const LOG_FILE_SUFFIX: &str = "log";

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Parse a rotation period name.
pub fn parse_rotation(rotation: &str) -> Result<Rotation> {
    match rotation.to_lowercase().as_str() {
        "minutely" => Ok(Rotation::MINUTELY),
        "hourly" => Ok(Rotation::HOURLY),
        "daily" => Ok(Rotation::DAILY),
        "never" => Ok(Rotation::NEVER),
        other => Err(FeedmailError::Config(format!(
            "unknown log rotation {other:?}: expected minutely, hourly, daily or never"
        ))),
    }
}

/// Build the rolling file appender described by `config`.
///
/// The log directory is created if missing.
pub fn file_appender(config: &LoggingConfig) -> Result<RollingFileAppender> {
    let directory = Path::new(&config.directory);
    fs::create_dir_all(directory)?;

    let mut builder = RollingFileAppender::builder()
        .rotation(parse_rotation(&config.rotation)?)
        .filename_prefix(config.file_prefix.as_str())
        .filename_suffix(LOG_FILE_SUFFIX);
    if config.max_files > 0 {
        builder = builder.max_log_files(config.max_files);
    }

    builder.build(directory).map_err(|e| {
        FeedmailError::Config(format!(
            "cannot open log file in {}: {e}",
            directory.display()
        ))
    })
}

/// Initialize logging to stdout and the rolling log file.
///
/// The returned guard flushes the background writer when dropped; keep it
/// alive for the lifetime of the process.
pub fn init(config: &LoggingConfig) -> Result<WorkerGuard> {
    let level = parse_level(&config.level);
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let (file_writer, guard) = tracing_appender::non_blocking(file_appender(config)?);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout.and(file_writer))
                .with_ansi(false)
                .with_target(true),
        )
        .with(filter)
        .init();

    Ok(guard)
}

/// Initialize console-only logging, used when the log file cannot be opened.
pub fn init_console_only(level: &str) {
    let filter = EnvFilter::from_default_env().add_directive(parse_level(level).into());

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stdout))
        .with(filter)
        .init();
}

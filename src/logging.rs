//! Subscriber setup for the `stampede` binary.
//!
//! Writes structured logs to `<logfiles_directory>/stampede.log` and to
//! stdout. `RUST_LOG` overrides the configured level. Library code only
//! emits events; it never installs a subscriber.

use std::fs;
use std::io;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingSettings;

pub const LOG_FILE_NAME: &str = "stampede.log";

/// Flushes the file writer when dropped; keep it alive for the whole run.
pub struct LoggingGuard {
    _file_guard: WorkerGuard,
}

pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(settings.log_level.as_filter()))
}

pub fn init_logging(settings: &LoggingSettings) -> Result<LoggingGuard, io::Error> {
    fs::create_dir_all(&settings.logfiles_directory)?;

    let file_appender = tracing_appender::rolling::never(&settings.logfiles_directory, LOG_FILE_NAME);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_file)
        .with_ansi(false)
        .with_target(true);

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stdout)
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter(settings))
        .with(file_layer)
        .with(stdout_layer)
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))?;

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

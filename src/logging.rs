//! Tracing setup for offline runs
//!
//! Builders and the evaluator report progress, dropped data and final
//! metrics through `tracing`. [`init_tracing`] installs the process-wide
//! subscriber for a [`LoggingConfig`]:
//! - human-readable lines on stderr, leaving stdout to results
//! - optionally the same lines mirrored into one log file per run

use std::io;
use std::path::{Path, PathBuf};

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("invalid log filter {filter:?}: {source}")]
    Filter {
        filter: String,
        #[source]
        source: ParseError,
    },
    #[error("log file path has no file name: {0}")]
    LogFile(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("failed to open log file: {0}")]
    Appender(#[from] InitError),
    #[error("global subscriber already installed: {0}")]
    AlreadyInstalled(#[from] TryInitError),
}

/// Flushes the log file writer when dropped; hold it for the whole run
pub struct LogFileGuard {
    _guard: WorkerGuard,
}

/// Non-blocking writer appending to `path`, creating its directory
pub fn file_writer(path: &Path) -> Result<(NonBlocking, LogFileGuard), LoggingError> {
    let file_name = path
        .file_name()
        .ok_or_else(|| LoggingError::LogFile(path.to_path_buf()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name.to_string_lossy().into_owned())
        .build(dir)?;
    let (writer, guard) = tracing_appender::non_blocking(appender);
    Ok((writer, LogFileGuard { _guard: guard }))
}

/// Install the global subscriber
///
/// Fails if a subscriber is already installed; the returned guard must be
/// kept alive while the run logs to a file.
pub fn init_tracing(config: &LoggingConfig) -> Result<Option<LogFileGuard>, LoggingError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|source| LoggingError::Filter {
        filter: config.filter.clone(),
        source,
    })?;
    let stderr_layer = fmt::layer().with_target(true).with_writer(io::stderr);

    let (file_layer, guard) = match &config.log_file {
        Some(path) => {
            let (writer, guard) = file_writer(path)?;
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(filter = %config.filter, log_file = ?config.log_file, "tracing initialized");
    Ok(guard)
}

//! Tracing setup: JSON (or plain) lines to stderr and a daily-rotated file

use anyhow::Context;
use repoctx_config::TelemetryConfig;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

const LOG_FILE_PREFIX: &str = "repoctx-worker.log";

/// Flush guards for the non-blocking writers; drop them last
pub struct LogGuards {
    _file: WorkerGuard,
    _stderr: WorkerGuard,
}

/// Install the global subscriber
///
/// # Errors
/// Returns an error if the log directory cannot be created
pub fn init(config: &TelemetryConfig, log_dir: Option<PathBuf>) -> anyhow::Result<LogGuards> {
    let log_dir = log_dir
        .or_else(|| config.log_dir.clone())
        .unwrap_or_else(default_log_dir);
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("Failed to create log directory '{}'", log_dir.display()))?;

    // 1. File logger (daily rotation, async non-blocking)
    let file_appender = RollingFileAppender::new(Rotation::DAILY, &log_dir, LOG_FILE_PREFIX);
    let (file_writer, file_guard): (NonBlocking, WorkerGuard) =
        tracing_appender::non_blocking(file_appender);

    // 2. Stderr logger (async non-blocking)
    let (stderr_writer, stderr_guard): (NonBlocking, WorkerGuard) =
        tracing_appender::non_blocking(std::io::stderr());

    let writer = file_writer.and(stderr_writer);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(filter);
    if config.json {
        builder.json().init();
    } else {
        builder.with_ansi(false).init();
    }

    tracing::debug!(log_dir = %log_dir.display(), "Logging initialized");
    Ok(LogGuards {
        _file: file_guard,
        _stderr: stderr_guard,
    })
}

/// Get the default log directory based on the operating system
fn default_log_dir() -> PathBuf {
    #[cfg(target_os = "macos")]
    {
        // macOS: ~/Library/Logs/repoctx
        if let Some(home) = dirs::home_dir() {
            return home.join("Library").join("Logs").join("repoctx");
        }
    }

    let system_log_dir = Path::new("/var/log/repoctx");
    if cfg!(unix) && system_log_dir.exists() && is_writable(system_log_dir) {
        system_log_dir.to_path_buf()
    } else if let Some(data_dir) = dirs::data_local_dir() {
        // ~/.local/share/repoctx/logs or %LOCALAPPDATA%\repoctx\logs
        data_dir.join("repoctx").join("logs")
    } else if let Some(home) = dirs::home_dir() {
        home.join(".repoctx").join("logs")
    } else {
        PathBuf::from("logs")
    }
}

/// Check if a directory is writable
fn is_writable(path: &Path) -> bool {
    tempfile::tempfile_in(path).is_ok()
}

//! File logging for replay sessions
//!
//! The replay binary owns stdout for its report, so diagnostics go to a
//! daily rotated file under the XDG state directory. Reconstruction
//! warnings (buffered drops, discarded expired events, malformed capture
//! lines) survive the run there.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LoggingConfig};

/// Flushes buffered log writes on drop. Hold it for the life of the process.
pub struct LoggingGuard {
    _worker: WorkerGuard,
}

/// Route tracing output to `~/.local/state/rivulet/rivulet.log`.
///
/// `RUST_LOG` takes precedence over the configured level, so one run can
/// be traced at a different level without editing the config file.
pub fn init(config: &LoggingConfig) -> crate::error::Result<LoggingGuard> {
    let state_dir = Config::state_dir();
    std::fs::create_dir_all(&state_dir)?;

    let appender = rolling::daily(&state_dir, "rivulet.log");
    let (writer, worker) = tracing_appender::non_blocking(appender);

    // The store is single threaded, so a compact line per event is enough;
    // no thread ids, no span events.
    tracing_subscriber::fmt()
        .with_env_filter(filter(config))
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .compact()
        .init();

    tracing::debug!(state_dir = %state_dir.display(), "logging to file");

    Ok(LoggingGuard { _worker: worker })
}

/// Send tracing output to the test harness instead of a file.
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Where [`init`] writes, for surfacing in error messages.
pub fn log_file_path() -> PathBuf {
    Config::log_path()
}

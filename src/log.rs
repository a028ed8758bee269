use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;

pub const LOG_FILE: &str = "housekeeping.log";

/// Installs the global subscriber. `RUST_LOG` wins, otherwise `info`.
///
/// With a log folder, output goes to a daily rolling file and the returned
/// guard must be held until exit so buffered lines get flushed. Without one,
/// logs go to stderr.
pub fn init(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match log_dir {
        Some(dir) => {
            let file_appender = rolling::daily(dir, LOG_FILE);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false) // no color codes in file
                .try_init()
                .ok()?;
            Some(guard)
        }
        None => {
            // A subscriber may already be set, e.g. from a test harness.
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
            None
        }
    }
}

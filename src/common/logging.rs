//! Logging and tracing configuration
//!
//! Every cluster CLI invocation is logged at DEBUG, lifecycle events at INFO,
//! and best-effort cleanup failures at WARN.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use super::paths;

/// Initialize tracing for the CLI (stderr logging)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("olmtest=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for scenario runs (stderr + log file)
///
/// The log file at `~/.local/share/olmtest/logs/scenarios.log` records every
/// CLI invocation at DEBUG so a failed run can be triaged afterwards. Runs
/// append to the same file; it is never rotated. The
/// returned guard must be held until the run ends to flush the file writer.
pub fn init_scenario_run() -> (Option<PathBuf>, Option<WorkerGuard>) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("olmtest=debug,warn"));

    match paths::ensure_log_dir() {
        Ok(Some(dir)) => {
            let appender = tracing_appender::rolling::never(&dir, paths::SCENARIO_LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true);

            // Keep the terminal readable while the file records DEBUG
            let stderr_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
                .with_filter(LevelFilter::INFO);

            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(stderr_layer)
                .init();

            (paths::scenario_log_path(), Some(guard))
        }
        Ok(None) | Err(_) => {
            let stderr_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact()
                .with_filter(LevelFilter::INFO);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr_layer)
                .init();
            (None, None)
        }
    }
}

//! Logging setup for the conductor CLI.
//!
//! Human-facing output goes to stdout; diagnostics go to stderr and to a daily
//! rolling file under `~/.conductor/logs/`.

use std::env;

use conductor_core::StoragePaths;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

const LOG_ENV_VAR: &str = "CONDUCTOR_LOG";
const DEBUG_ENV_VAR: &str = "CONDUCTOR_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "conductor.log";

fn filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV_VAR)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Installs the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init() -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter());

    let file = StoragePaths::discover().and_then(|paths| match paths.ensure_dirs() {
        Ok(()) => Some(paths.logs_dir()),
        Err(err) => {
            eprintln!("conductor: log directory unavailable: {err}");
            None
        }
    });

    match file {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(filter());
            tracing_subscriber::registry()
                .with(stderr_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(stderr_layer).init();
            None
        }
    }
}

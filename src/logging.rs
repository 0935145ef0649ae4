//! Structured logging setup for hosts embedding the engine.
//!
//! The engine itself only emits `tracing` events; hosts that don't already
//! carry a subscriber can install one here. [`init_production`] layers a
//! JSON file appender (daily rotation) under a human-readable stderr
//! layer; [`init_dev`] is stderr-only for tests and local runs.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset: engine events at info, the
/// noisier HTTP internals at warn.
const DEFAULT_FILTER: &str = "info,hyper=warn,reqwest=warn";

/// Keeps the non-blocking file writer alive.
///
/// Dropping the guard flushes pending entries and closes the file, so the
/// host must hold it for the process lifetime.
pub struct LoggingGuard {
    _guard: WorkerGuard,
}

/// Install the production subscriber.
///
/// JSON events land in `{logs_dir}/{file_stem}.YYYY-MM-DD` with daily
/// rotation; stderr gets the human-readable layer. Both honour `RUST_LOG`.
///
/// # Errors
///
/// Returns an error if the logs directory cannot be created.
pub fn init_production(logs_dir: &Path, file_stem: &str) -> anyhow::Result<LoggingGuard> {
    std::fs::create_dir_all(logs_dir).map_err(|e| {
        anyhow::anyhow!(
            "failed to create logs directory {}: {e}",
            logs_dir.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::daily(logs_dir, file_stem);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_writer(non_blocking),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    Ok(LoggingGuard { _guard: guard })
}

/// Install a stderr-only subscriber for tests and local development.
pub fn init_dev() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

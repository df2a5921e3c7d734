//! Logging setup

use crate::error::{GeoQueryError, Result};
use once_cell::sync::Lazy;
use std::str::FromStr;
use std::sync::{Mutex, Once};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::Registry;
use tracing_subscriber::fmt::Layer;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::layer::SubscriberExt;

/// Environment variable holding the maximum log level (`INFO` by default).
pub const LOG_LEVEL_ENV: &str = "GEOQUERY_LOG_LEVEL";

fn log_level() -> Level {
    std::env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|level| Level::from_str(&level).ok())
        .unwrap_or(Level::INFO)
}

/// Install the global subscriber writing to stdout through a non-blocking
/// worker. Keep the returned guards alive for as long as logs should flush.
pub fn init_logging() -> Result<Vec<WorkerGuard>> {
    let mut guards = vec![];

    let (stdout_write, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let stdout_layer = Layer::new()
        .with_writer(stdout_write.with_max_level(log_level()))
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false);
    guards.push(stdout_guard);

    let subscriber = Registry::default().with(stdout_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| GeoQueryError::internal(format!("logging already initialised: {}", e)))?;

    Ok(guards)
}

static GLOBAL_TEST_LOG_GUARDS: Lazy<Mutex<Option<Vec<WorkerGuard>>>> =
    Lazy::new(|| Mutex::new(None));

/// Install logging once per process; later calls are no-ops.
pub fn init_test_logging() {
    static START: Once = Once::new();

    START.call_once(|| {
        if let Ok(mut guards) = GLOBAL_TEST_LOG_GUARDS.lock() {
            *guards = init_logging().ok();
        }
    });
}

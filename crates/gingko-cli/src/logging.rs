use std::env;
use std::path::Path;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_LOG_DIR: &str = "./logs";
/// Daily files kept before the oldest is removed.
const RETAINED_LOG_FILES: usize = 30;

/// `gingko.YYYY-MM-DD.log` in `dir`, rotated at midnight UTC.
fn daily_appender(dir: &Path) -> Result<RollingFileAppender, InitError> {
    RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("gingko")
        .filename_suffix("log")
        .max_log_files(RETAINED_LOG_FILES)
        .build(dir)
}

/// Stdout plus a daily rolling file under `GINGKO_LOGGING_DIR`. Level from
/// `TRACING_LEVEL`. Keep the returned guard alive until exit so buffered
/// lines reach the file.
pub fn init_logger() -> Option<WorkerGuard> {
    let filter = env::var("TRACING_LEVEL").unwrap_or_else(|_| "info".to_string());
    let log_dir = env::var("GINGKO_LOGGING_DIR").unwrap_or_else(|_| DEFAULT_LOG_DIR.to_string());

    let (file_layer, guard, file_error) = match daily_appender(Path::new(&log_dir)) {
        Ok(appender) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(non_blocking)
                .with_target(true)
                .with_ansi(false);
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stdout)
                .pretty()
                .with_file(false)
                .without_time()
                .with_ansi(true),
        )
        .with(file_layer)
        .with(EnvFilter::new(filter))
        .init();

    match file_error {
        None => info!("Logging to stdout and {}", log_dir),
        Some(e) => warn!("File logging disabled, cannot use {}: {}", log_dir, e),
    }

    guard
}

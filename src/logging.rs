//! Tracing setup for the hook.
//!
//! Stdout carries the payload, so the console layer writes to stderr.
//! A daily rolling file can be added for hosts where hook stderr is lost.

use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const DEFAULT_FILTER: &str = "warn";
const LOG_FILE_PREFIX: &str = "notify_webhook";

pub struct FileLogger {
    log_directory: PathBuf,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            rotation: Rotation::DAILY,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn setup_file_logging(
        &self,
    ) -> std::io::Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory)?;
        let file_appender =
            RollingFileAppender::new(self.rotation.clone(), &self.log_directory, LOG_FILE_PREFIX);
        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Maps `minutely`, `hourly`, `daily` or `never` to a file rotation.
pub fn parse_rotation(value: &str) -> Option<Rotation> {
    match value.trim().to_ascii_lowercase().as_str() {
        "minutely" => Some(Rotation::MINUTELY),
        "hourly" => Some(Rotation::HOURLY),
        "daily" => Some(Rotation::DAILY),
        "never" => Some(Rotation::NEVER),
        _ => None,
    }
}

/// Installs the global subscriber. `RUST_LOG` overrides the `warn` default.
///
/// Keep the returned guard alive until exit so buffered file lines are flushed.
pub fn setup_logging(file_logger: Option<&FileLogger>) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (file_layer, guard) = match file_logger.map(FileLogger::setup_file_logging) {
        Some(Ok((writer, guard))) => (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(writer)
                    .with_ansi(false),
            ),
            Some(guard),
        ),
        Some(Err(e)) => {
            eprintln!("notify-webhook: file logging disabled: {}", e);
            (None, None)
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

use std::path::PathBuf;

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use crate::config::Settings;
use crate::error::DeployError;

pub const DEFAULT_MAX_LOG_FILES: usize = 5;
const LOG_FILE_PREFIX: &str = "home_deployer";

/// Rolling log files next to the console output
pub struct FileLogger {
    log_directory: PathBuf,
    max_files: usize,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            max_files: DEFAULT_MAX_LOG_FILES,
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    /// Creates the log directory and a non-blocking writer into it.
    /// The guard must be kept alive for buffered lines to be flushed.
    pub fn setup_file_logging(&self) -> Result<(NonBlocking, WorkerGuard), DeployError> {
        std::fs::create_dir_all(&self.log_directory).map_err(|e| {
            DeployError::LoggingError(format!(
                "Failed to create log directory {:?}: {}",
                self.log_directory, e
            ))
        })?;

        let file_appender = RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix(LOG_FILE_PREFIX)
            .max_log_files(self.max_files)
            .build(&self.log_directory)
            .map_err(|e| DeployError::LoggingError(e.to_string()))?;

        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Filter used when `RUST_LOG` is not set.
pub fn default_filter(debug: bool) -> &'static str {
    if debug { "debug" } else { "info" }
}

/// Installs the global subscriber: console output, plus rolling files when
/// `log_directory` is configured.
pub fn setup_logging(settings: &Settings) -> Result<Option<WorkerGuard>, DeployError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(settings.debug)));

    let (file_layer, guard) = match &settings.log_directory {
        Some(dir) => {
            let (writer, guard) = FileLogger::new(dir.clone())
                .with_max_files(settings.log_max_files)
                .setup_file_logging()?;
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(file_layer)
        .try_init()
        .map_err(|e| DeployError::LoggingError(e.to_string()))?;

    Ok(guard)
}

//! Structured logging for Coffer
//!
//! # Features
//!
//! - **JSONL Output**: Structured JSON lines format for log aggregation (default)
//! - **Pretty Output**: Human-readable console output for development
//! - **File Rotation**: Daily/hourly log rotation via tracing-appender
//! - **Env Override**: `RUST_LOG` takes precedence over configured levels
//!
//! Console output goes to stderr so that commands streaming object content
//! to stdout stay clean.
//!
//! # Quick Start
//!
//! ```ignore
//! use coffer_logging::{CofferSubscriberBuilder, LogConfig};
//!
//! // JSONL to stderr
//! let _guard = CofferSubscriberBuilder::new().init();
//!
//! // Development mode with pretty human-readable output
//! let _guard = CofferSubscriberBuilder::new()
//!     .with_config(LogConfig::development())
//!     .init();
//! ```

pub mod config;
pub mod layers;

pub use config::{ConsoleConfig, FileConfig, JsonlConfig, LogConfig, RotationStrategy};

use thiserror::Error;
use tracing::Dispatch;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::layers::BoxedLayer;

/// Errors raised while setting up logging
#[derive(Debug, Error)]
pub enum LoggingError {
    /// A filter directive could not be parsed
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Log file could not be opened
    #[error("Log file error: {0}")]
    Io(String),

    /// A global subscriber is already installed
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),
}

/// Keeps background file writers alive; logs are flushed when dropped
#[derive(Default)]
#[must_use = "dropping the guard stops file logging"]
pub struct LogGuard {
    workers: Vec<WorkerGuard>,
}

impl std::fmt::Debug for LogGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogGuard")
            .field("workers", &self.workers.len())
            .finish()
    }
}

/// Builder for configuring and initializing the Coffer logging subscriber
///
/// By default, console output uses JSONL format. Use `LogConfig::development()`
/// for human-readable pretty output during development.
pub struct CofferSubscriberBuilder {
    config: LogConfig,
}

impl CofferSubscriberBuilder {
    /// Create a new subscriber builder with default configuration
    pub fn new() -> Self {
        Self {
            config: LogConfig::default(),
        }
    }

    /// Use a specific configuration
    pub fn with_config(mut self, config: LogConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the default log level
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.config.default_level = level.into();
        self
    }

    /// Enable or disable console output
    pub fn with_console(mut self, enabled: bool) -> Self {
        self.config.console.enabled = enabled;
        self
    }

    /// Configure file output
    pub fn with_file_output(mut self, config: FileConfig) -> Self {
        self.config.file = Some(config);
        self
    }

    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Build the subscriber without installing it
    pub fn build(self) -> Result<(Dispatch, LogGuard), LoggingError> {
        let env_filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(self.config.directives())
                .map_err(|e| LoggingError::InvalidFilter(e.to_string()))?,
        };

        let mut guard = LogGuard::default();
        let mut outputs: Vec<BoxedLayer> = Vec::new();

        if self.config.console.enabled {
            outputs.push(layers::console_layer(
                &self.config.console,
                &self.config.jsonl,
            ));
        }

        if let Some(file) = &self.config.file {
            let (writer, worker) = layers::file_writer(file)?;
            guard.workers.push(worker);
            outputs.push(layers::jsonl_layer(writer, &self.config.jsonl));
        }

        let subscriber = Registry::default().with(env_filter).with(outputs);
        Ok((Dispatch::new(subscriber), guard))
    }

    /// Install the subscriber globally
    ///
    /// Returns an error if a global subscriber has already been set.
    pub fn try_init(self) -> Result<LogGuard, LoggingError> {
        let (dispatch, guard) = self.build()?;
        tracing::dispatcher::set_global_default(dispatch)
            .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;
        Ok(guard)
    }

    /// Install the subscriber globally, reporting failure on stderr
    pub fn init(self) -> LogGuard {
        match self.try_init() {
            Ok(guard) => guard,
            Err(e) => {
                eprintln!("Warning: Failed to initialize logging: {e}");
                LogGuard::default()
            }
        }
    }
}

impl Default for CofferSubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize logging with default settings (JSONL to stderr)
pub fn init_default() -> LogGuard {
    CofferSubscriberBuilder::new().init()
}

/// Initialize logging for testing (minimal output)
///
/// Safe to call from many tests; only the first call installs anything.
pub fn init_testing() {
    let _ = CofferSubscriberBuilder::new()
        .with_config(LogConfig::testing())
        .try_init();
}

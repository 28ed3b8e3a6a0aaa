//! Output layers
//!
//! Each helper returns a boxed layer so the builder can stack any
//! combination of console and file output on one registry.

use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layer, Layered};
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::{ConsoleConfig, FileConfig, JsonlConfig, RotationStrategy};
use crate::LoggingError;

/// Subscriber every output layer is stacked on
pub type Base = Layered<EnvFilter, Registry>;

/// A type-erased output layer
pub type BoxedLayer = Box<dyn Layer<Base> + Send + Sync + 'static>;

/// Console layer writing to stderr
pub fn console_layer(console: &ConsoleConfig, jsonl: &JsonlConfig) -> BoxedLayer {
    if console.pretty {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(console.ansi)
            .with_target(true)
            .boxed()
    } else {
        jsonl_layer(std::io::stderr, jsonl)
    }
}

/// JSONL layer for log aggregation
pub fn jsonl_layer<W>(writer: W, jsonl: &JsonlConfig) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(jsonl.include_spans)
        .flatten_event(jsonl.flatten_events)
        .with_file(jsonl.include_location)
        .with_line_number(jsonl.include_location)
        .with_thread_ids(jsonl.include_thread_info)
        .with_thread_names(jsonl.include_thread_info)
        .with_ansi(false)
        .with_writer(writer)
        .boxed()
}

/// Open a non-blocking rolling file writer
pub fn file_writer(file: &FileConfig) -> Result<(NonBlocking, WorkerGuard), LoggingError> {
    let rotation = match file.rotation {
        RotationStrategy::Daily => Rotation::DAILY,
        RotationStrategy::Hourly => Rotation::HOURLY,
        RotationStrategy::Never => Rotation::NEVER,
    };

    let mut builder = RollingFileAppender::builder()
        .rotation(rotation)
        .filename_prefix(&file.prefix)
        .filename_suffix("log");
    if let Some(max) = file.max_files {
        builder = builder.max_log_files(max);
    }

    let appender = builder
        .build(&file.directory)
        .map_err(|e| LoggingError::Io(format!("{}: {e}", file.directory.display())))?;

    Ok(tracing_appender::non_blocking(appender))
}

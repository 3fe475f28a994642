// External crates
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::panic;
use std::path::PathBuf;
use tracing::error;
use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    Layer,
    filter::{EnvFilter, filter_fn},
    fmt,
    prelude::*,
    registry::Registry,
};

/// Target used for events that belong in the success journal (`success.log`).
///
/// Emit with `tracing::info!(target: "success", ...)`.
pub const SUCCESS_TARGET: &str = "success";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// How log files roll over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    /// One file, appended forever.
    #[default]
    Never,
    /// A new file every minute.
    Minutely,
    /// A new file every hour.
    Hourly,
    /// A new file every day.
    Daily,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Never => Rotation::NEVER,
            LogRotation::Minutely => Rotation::MINUTELY,
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
        }
    }
}

/// Which stream human-readable console output goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Selects which events a file sink receives.
#[derive(Debug, Clone)]
pub enum SinkFilter {
    /// Every event at or above the level.
    MinLevel(LevelFilter),
    /// Only events emitted with this exact target.
    Target(&'static str),
}

/// One log file fed by the subscriber.
#[derive(Debug, Clone)]
pub struct FileSink {
    /// File name (prefix when rotation is enabled) inside the log directory.
    pub file_name: String,
    /// Event selection for this file.
    pub filter: SinkFilter,
}

impl FileSink {
    /// Sink receiving everything at or above `level`.
    pub fn at_level(file_name: impl Into<String>, level: LevelFilter) -> Self {
        Self {
            file_name: file_name.into(),
            filter: SinkFilter::MinLevel(level),
        }
    }

    /// Sink receiving only events with `target`.
    pub fn for_target(file_name: impl Into<String>, target: &'static str) -> Self {
        Self {
            file_name: file_name.into(),
            filter: SinkFilter::Target(target),
        }
    }
}

/// Subscriber configuration.
#[derive(Debug, Clone)]
pub struct TracingOptions {
    /// Directive used when `RUST_LOG` is not set, e.g. `info`.
    pub default_directive: String,
    /// Where console output goes.
    pub console: ConsoleStream,
    /// Directory holding the file sinks. Ignored when `sinks` is empty.
    pub log_dir: Option<PathBuf>,
    /// Rotation applied to every file sink.
    pub rotation: LogRotation,
    /// File sinks.
    pub sinks: Vec<FileSink>,
    /// Write file sinks as JSON lines instead of plain text.
    pub json: bool,
}

impl TracingOptions {
    /// Console-only logging.
    pub fn console_only(default_directive: impl Into<String>, console: ConsoleStream) -> Self {
        Self {
            default_directive: default_directive.into(),
            console,
            log_dir: None,
            rotation: LogRotation::Never,
            sinks: Vec::new(),
            json: false,
        }
    }
}

/// Keeps the non-blocking file writers alive. Dropping it flushes and
/// stops them, so hold it until the process is about to exit.
#[derive(Debug)]
#[must_use = "dropping the guards stops the file writers"]
pub struct TracingGuards {
    _guards: Vec<WorkerGuard>,
}

/// Install the global tracing subscriber.
pub fn init_tracing(options: &TracingOptions) -> Result<TracingGuards> {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = Vec::new();

    let console_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&options.default_directive));

    let console_layer = match options.console {
        ConsoleStream::Stdout => fmt::layer()
            .with_writer(std::io::stdout)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_filter(console_filter)
            .boxed(),
        ConsoleStream::Stderr => fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_filter(console_filter)
            .boxed(),
    };
    layers.push(console_layer);

    if !options.sinks.is_empty() {
        let log_dir = options
            .log_dir
            .clone()
            .context("File log sinks configured without a log directory")?;

        for sink in &options.sinks {
            let appender = RollingFileAppender::builder()
                .rotation(options.rotation.into())
                .filename_prefix(&sink.file_name)
                .build(&log_dir)
                .with_context(|| {
                    format!(
                        "Failed to open log file {} in {}",
                        sink.file_name,
                        log_dir.display()
                    )
                })?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);

            layers.push(file_layer(writer, &sink.filter, options.json));
        }
    }

    layers.push(ErrorLayer::default().boxed());

    let subscriber = Registry::default().with(layers);
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set global tracing subscriber")?;

    Ok(TracingGuards { _guards: guards })
}

fn file_layer(
    writer: tracing_appender::non_blocking::NonBlocking,
    filter: &SinkFilter,
    json: bool,
) -> BoxedLayer {
    let base = fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_thread_names(true)
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339());

    match (filter.clone(), json) {
        (SinkFilter::MinLevel(level), false) => base.with_filter(level).boxed(),
        (SinkFilter::MinLevel(level), true) => base.json().with_filter(level).boxed(),
        (SinkFilter::Target(target), false) => base
            .with_filter(filter_fn(move |meta| meta.target() == target))
            .boxed(),
        (SinkFilter::Target(target), true) => base
            .json()
            .with_filter(filter_fn(move |meta| meta.target() == target))
            .boxed(),
    }
}

/// Route panics through tracing so they land in the log files.
pub fn init_panic_handler() {
    panic::set_hook(Box::new(|panic_info| {
        let payload = panic_info.payload();
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Unknown panic".to_string());

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            message = %msg,
            location = %location,
            "Application panicked!"
        );
    }));
}

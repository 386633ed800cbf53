//! # Logging & Tracing Infrastructure
//!
//! Configures `tracing-subscriber` for the streaming core:
//! - Pretty, JSON and compact output formats
//! - Per-crate filtering through `EnvFilter`
//! - Mirroring of events into a host [`LoggerSink`]
//! - Span contexts (`open`, `reset`, the feeder thread)
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_traits::time::{ConsoleLogger, LogLevel};
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use std::sync::Arc;
//!
//! let config = LoggingConfig::default()
//!     .with_format(LogFormat::Compact)
//!     .with_level(LogLevel::Debug)
//!     .with_logger_sink(Arc::new(ConsoleLogger::default()));
//! init_logging(config)?;
//!
//! tracing::info!("Audio started");
//! ```
//!
//! ## LoggerSink integration
//!
//! The sink receives a [`LogEntry`] for every event that passes the filter
//! and the sink's own minimum level. It is called synchronously on the thread
//! that emitted the event, which includes the real-time feeder thread.

use crate::error::{Error, Result};
use bridge_traits::time::{LogEntry, LogLevel, LoggerSink};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::format::FmtSpan,
    layer::{Context, Layered, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
    Layer, Registry,
};

/// Crates whose events are shown at the configured level by default.
const WORKSPACE_TARGETS: &[&str] = &[
    "core_playback",
    "core_runtime",
    "bridge_desktop",
    "bridge_traits",
];

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable multi-line format with colors
    Pretty,
    /// Structured JSON, one object per line
    Json,
    /// Single-line format
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

/// Logging configuration
#[derive(Clone)]
pub struct LoggingConfig {
    /// Output format
    pub format: LogFormat,
    /// Minimum level for workspace crates
    pub level: LogLevel,
    /// Custom filter string (e.g., "core_playback=trace,bridge_desktop=warn");
    /// replaces the default per-crate filter entirely
    pub filter: Option<String>,
    /// Optional sink receiving a copy of every event
    pub logger_sink: Option<Arc<dyn LoggerSink>>,
    /// Report span activity (pretty) or span context (JSON)
    pub enable_spans: bool,
    /// Display target module in logs
    pub display_target: bool,
    /// Display thread names and ids; useful to tell the feeder apart
    pub display_thread_info: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            logger_sink: None,
            enable_spans: true,
            display_target: true,
            display_thread_info: false,
        }
    }
}

impl fmt::Debug for LoggingConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoggingConfig")
            .field("format", &self.format)
            .field("level", &self.level)
            .field("filter", &self.filter)
            .field("has_logger_sink", &self.logger_sink.is_some())
            .field("enable_spans", &self.enable_spans)
            .finish()
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_logger_sink(mut self, sink: Arc<dyn LoggerSink>) -> Self {
        self.logger_sink = Some(sink);
        self
    }

    pub fn with_spans(mut self, enable: bool) -> Self {
        self.enable_spans = enable;
        self
    }

    pub fn with_target(mut self, display: bool) -> Self {
        self.display_target = display;
        self
    }

    pub fn with_thread_info(mut self, display: bool) -> Self {
        self.display_thread_info = display;
        self
    }
}

type FilteredRegistry = Layered<EnvFilter, Registry>;

/// Initialize the global subscriber.
///
/// Call once at startup; later calls fail with [`Error::Config`].
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = build_filter(&config)?;

    let fmt_layer: Box<dyn Layer<FilteredRegistry> + Send + Sync> = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer()
            .pretty()
            .with_target(config.display_target)
            .with_thread_ids(config.display_thread_info)
            .with_thread_names(config.display_thread_info)
            .with_span_events(if config.enable_spans {
                FmtSpan::ACTIVE
            } else {
                FmtSpan::NONE
            })
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(config.enable_spans)
            .with_span_list(config.enable_spans)
            .with_target(config.display_target)
            .with_thread_ids(config.display_thread_info)
            .with_thread_names(config.display_thread_info)
            .with_writer(io::stdout)
            .boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(config.display_target)
            .with_thread_ids(config.display_thread_info)
            .with_thread_names(config.display_thread_info)
            .with_writer(io::stdout)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(LoggerSinkLayer::new(config.logger_sink))
        .try_init()
        .map_err(|e| Error::Config(format!("Failed to initialize logging: {}", e)))
}

fn level_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Trace => "trace",
        LogLevel::Debug => "debug",
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let filter_string = match &config.filter {
        Some(custom) => custom.clone(),
        None => {
            // Workspace crates at the configured level, everything else at warn.
            let level = level_name(config.level);
            let mut directives = vec!["warn".to_string()];
            directives.extend(
                WORKSPACE_TARGETS
                    .iter()
                    .map(|target| format!("{}={}", target, level)),
            );
            directives.join(",")
        }
    };

    EnvFilter::try_new(filter_string)
        .map_err(|e| Error::Config(format!("Invalid log filter: {}", e)))
}

/// Layer that forwards events to a `LoggerSink` implementation.
struct LoggerSinkLayer {
    sink: Option<Arc<dyn LoggerSink>>,
}

impl LoggerSinkLayer {
    fn new(sink: Option<Arc<dyn LoggerSink>>) -> Self {
        Self { sink }
    }
}

impl<S> Layer<S> for LoggerSinkLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let Some(sink) = self.sink.as_ref() else {
            return;
        };

        let metadata = event.metadata();
        let level = tracing_level_to_log_level(*metadata.level());
        if level < sink.min_level() {
            return;
        }

        let mut visitor = SinkVisitor::default();
        event.record(&mut visitor);

        let message = visitor
            .message
            .unwrap_or_else(|| metadata.name().to_string());
        let mut entry = LogEntry::new(level, metadata.target(), message);
        for (key, value) in visitor.fields {
            entry = entry.with_field(key, value);
        }
        if let Some(span) = ctx.lookup_current() {
            entry = entry.with_span_id(span.name());
        }

        if let Err(err) = sink.log(entry) {
            eprintln!("LoggerSink error: {}", err);
        }
    }
}

#[derive(Default)]
struct SinkVisitor {
    message: Option<String>,
    fields: HashMap<String, String>,
}

impl SinkVisitor {
    fn record_value(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = Some(value);
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for SinkVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.record_value(field, value.to_string());
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.record_value(field, value.to_string());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.record_value(field, value.to_string());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.record_value(field, value.to_string());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.record_value(field, value.to_string());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.record_value(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.record_value(field, format!("{:?}", value));
    }
}

fn tracing_level_to_log_level(level: tracing::Level) -> LogLevel {
    match level {
        tracing::Level::TRACE => LogLevel::Trace,
        tracing::Level::DEBUG => LogLevel::Debug,
        tracing::Level::INFO => LogLevel::Info,
        tracing::Level::WARN => LogLevel::Warn,
        tracing::Level::ERROR => LogLevel::Error,
    }
}

/// Reduce a file path to its final component.
///
/// ```ignore
/// use core_runtime::logging::strip_path;
///
/// tracing::info!(file = %strip_path("/home/me/audio/theme.ogg"), "Opening");
/// // Logs: file="theme.ogg"
/// ```
pub fn strip_path(path: &str) -> &str {
    path.rsplit(&['/', '\\'][..]).next().unwrap_or(path)
}

//! Logging Abstractions
//!
//! Provides the logging sink hosts implement to receive structured log
//! entries from the streaming core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::Result;

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// Structured log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Log level
    pub level: LogLevel,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Target module/component
    pub target: String,
    /// Log message
    pub message: String,
    /// Structured fields
    pub fields: HashMap<String, String>,
    /// Name of the span the event was recorded in
    pub span_id: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, target: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level,
            timestamp: Utc::now(),
            target: target.into(),
            message: message.into(),
            fields: HashMap::new(),
            span_id: None,
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn with_span_id(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }
}

/// Logger sink trait
///
/// Forwards structured logs from the core to host logging pipelines
/// (system log, log files, an in-game console).
///
/// Sinks are called synchronously from whichever thread emitted the event,
/// including the real-time feeder thread, so `log` must not block for long.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::time::{LoggerSink, LogEntry, LogLevel};
///
/// fn log_error(logger: &dyn LoggerSink, error: &str) {
///     let entry = LogEntry::new(LogLevel::Error, "core", error)
///         .with_field("component", "feeder");
///     logger.log(entry).ok();
/// }
/// ```
pub trait LoggerSink: Send + Sync {
    /// Forward a log entry to the host logging system
    fn log(&self, entry: LogEntry) -> Result<()>;

    /// Flush any buffered logs
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Get the minimum log level that will be processed
    ///
    /// Logs below this level can be filtered out at the source for performance.
    fn min_level(&self) -> LogLevel {
        LogLevel::Info
    }
}

/// Console logger implementation for testing/development
#[derive(Debug, Clone)]
pub struct ConsoleLogger {
    pub min_level: LogLevel,
}

impl Default for ConsoleLogger {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
        }
    }
}

impl LoggerSink for ConsoleLogger {
    fn log(&self, entry: LogEntry) -> Result<()> {
        if entry.level >= self.min_level {
            let level_str = match entry.level {
                LogLevel::Trace => "TRACE",
                LogLevel::Debug => "DEBUG",
                LogLevel::Info => "INFO",
                LogLevel::Warn => "WARN",
                LogLevel::Error => "ERROR",
            };

            println!(
                "[{}] {} {}: {}",
                entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
                level_str,
                entry.target,
                entry.message
            );

            if !entry.fields.is_empty() {
                println!("  Fields: {:?}", entry.fields);
            }
        }
        Ok(())
    }

    fn min_level(&self) -> LogLevel {
        self.min_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_builder() {
        let entry = LogEntry::new(LogLevel::Info, "test", "Test message")
            .with_field("buffer_id", "3")
            .with_span_id("feeder");

        assert_eq!(entry.level, LogLevel::Info);
        assert_eq!(entry.target, "test");
        assert_eq!(entry.message, "Test message");
        assert_eq!(entry.fields.get("buffer_id"), Some(&"3".to_string()));
        assert_eq!(entry.span_id, Some("feeder".to_string()));
    }

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn test_console_logger() {
        let logger = ConsoleLogger::default();
        let entry = LogEntry::new(LogLevel::Info, "test", "Test log");

        logger.log(entry).unwrap();
        assert_eq!(logger.min_level(), LogLevel::Info);
    }
}

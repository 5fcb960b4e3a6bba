//! Consumer-visible operation log
//!
//! Every sync, export, and migration step appends a timestamped, leveled
//! entry. Entries are also forwarded to the `log` facade and, when a sink is
//! attached, delivered live for progress rendering.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Severity of a log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl From<LogLevel> for log::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Info | LogLevel::Success => log::Level::Info,
            LogLevel::Warning => log::Level::Warn,
            LogLevel::Error => log::Level::Error,
        }
    }
}

/// One line of the operation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Receives log entries as they are recorded
pub trait LogSink: Send + Sync {
    fn on_log(&self, entry: &LogEntry);
}

impl<F> LogSink for F
where
    F: Fn(&LogEntry) + Send + Sync,
{
    fn on_log(&self, entry: &LogEntry) {
        self(entry)
    }
}

/// Append-only log for a single operation
#[derive(Default)]
pub struct SyncLog {
    entries: Mutex<Vec<LogEntry>>,
    sink: Option<Arc<dyn LogSink>>,
}

impl SyncLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log that also forwards entries to `sink`
    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            sink: Some(sink),
        }
    }

    pub fn record(&self, level: LogLevel, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        };

        log::log!(target: "mailsync::sync", level.into(), "{}", entry.message);

        if let Some(sink) = &self.sink {
            sink.on_log(&entry);
        }

        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }

    pub fn info(&self, message: impl Into<String>) {
        self.record(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.record(LogLevel::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.record(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.record(LogLevel::Error, message);
    }

    /// Snapshot of everything recorded so far
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn into_entries(self) -> Vec<LogEntry> {
        self.entries.into_inner().unwrap_or_default()
    }
}

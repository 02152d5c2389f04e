//! Append-only, timestamped log streams shown to the operator.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    pub fn render(&self) -> String {
        format!("[{}] {}", self.at.format("%H:%M:%S"), self.message)
    }
}

/// Cheaply cloneable handle; all clones append to the same stream.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    source: Arc<str>,
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl ActivityLog {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: Arc::from(source.into()),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn push(&self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            LogLevel::Info | LogLevel::Success => log::info!("[{}] {}", self.source, message),
            LogLevel::Warning => log::warn!("[{}] {}", self.source, message),
            LogLevel::Error => log::error!("[{}] {}", self.source, message),
        }
        self.entries.lock().push(LogEntry {
            at: Utc::now(),
            level,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(LogLevel::Success, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message);
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries.lock().iter().map(|e| e.message.clone()).collect()
    }

    pub fn rendered(&self) -> Vec<String> {
        self.entries.lock().iter().map(LogEntry::render).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Entries appended after the first `offset`, for incremental display.
    pub fn since(&self, offset: usize) -> Vec<LogEntry> {
        self.entries.lock().iter().skip(offset).cloned().collect()
    }
}

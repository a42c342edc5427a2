//! The reserved `_log` stream's record shape (spec §6.2).

use crate::record::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

/// A structured record published onto `_log`. Mirrors `EngineError::code`
/// values in `message`/`code`, so a subscriber can pattern-match on `code`
/// without parsing prose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Record>,
}

impl LogRecord {
    pub fn new(level: LogLevel, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            level,
            code: code.into(),
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: Record) -> Self {
        self.context = Some(context);
        self
    }

    pub fn into_record(self) -> Record {
        serde_json::to_value(self).unwrap_or(Record::Null)
    }
}

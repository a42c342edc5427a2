//! Structured error taxonomy (spec §7).
//!
//! Library-facing APIs return `Result<T, EngineError>`. Background failures
//! (a subscriber callback panicking, a sink publish failing) never produce
//! an `Err` that unwinds the `insert` call — they are logged to the `_log`
//! stream instead (see `flowql-engine::registry`) and are represented here
//! only so the `_log` record's `code` field has a stable name to cite.

use thiserror::Error;

/// A source position, used by lex/parse errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("lex error at {position}: {message}")]
    Lex { position: Position, message: String },

    #[error("parse error at {position}: expected {expected}, got {got}")]
    Parse {
        position: Position,
        expected: String,
        got: String,
    },

    #[error("plan error: {0}")]
    Plan(String),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("stream already exists: {0}")]
    StreamAlreadyExists(String),

    #[error("flow not found: {0}")]
    FlowNotFound(String),

    #[error("flow already exists: {0}")]
    FlowAlreadyExists(String),

    #[error("reserved name: {0}")]
    ReservedName(String),

    #[error("subscriber failure on {stream}: {message}")]
    SubscriberFailure { stream: String, message: String },

    #[error("sink publish failure into {target}: {message}")]
    SinkPublishFailure { target: String, message: String },

    #[error("cancelled")]
    Cancelled,
}

impl EngineError {
    /// Stable short code used as the `code` field of `_log` records and in
    /// CLI-facing `{success, code, message}` results.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Lex { .. } => "lex_error",
            EngineError::Parse { .. } => "parse_error",
            EngineError::Plan(_) => "plan_error",
            EngineError::StreamNotFound(_) => "stream_not_found",
            EngineError::StreamAlreadyExists(_) => "stream_already_exists",
            EngineError::FlowNotFound(_) => "flow_not_found",
            EngineError::FlowAlreadyExists(_) => "flow_already_exists",
            EngineError::ReservedName(_) => "reserved_name",
            EngineError::SubscriberFailure { .. } => "subscriber_failure",
            EngineError::SinkPublishFailure { .. } => "sink_publish_failure",
            EngineError::Cancelled => "cancelled",
        }
    }
}

/// A set of parse errors. The parser aggregates several before giving up
/// (spec §4.2: "Multiple errors may be reported per parse").
#[derive(Debug, Clone, Error)]
#[error("{} parse error(s)", .0.len())]
pub struct ParseErrors(pub Vec<EngineError>);

pub type Result<T> = std::result::Result<T, EngineError>;

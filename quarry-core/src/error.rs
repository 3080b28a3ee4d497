//! Error types for the Quarry core library.
//!
//! Uses `thiserror` for public API error types with structured variants
//! covering the language model, tools, the event store, event decoding,
//! the research aggregate, and configuration.

use std::path::PathBuf;

/// Top-level error type for the Quarry core library.
#[derive(Debug, thiserror::Error)]
pub enum QuarryError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Event store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Aggregate error: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The run was cancelled by the caller or by the session timeout.
    #[error("Research cancelled")]
    Cancelled,

    #[error("Research failed: {message}")]
    Research { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl QuarryError {
    /// Whether this error is the cancellation outcome rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            QuarryError::Cancelled
                | QuarryError::Llm(LlmError::Cancelled)
                | QuarryError::Tool(ToolError::Cancelled { .. })
        )
    }

    /// Whether this error loses durability and must abort the run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, QuarryError::Store(_) | QuarryError::Aggregate(_))
    }
}

/// Errors from language model interactions.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("API request failed: {message}")]
    ApiRequest { message: String },

    #[error("API response parse error: {message}")]
    ResponseParse { message: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Model returned an empty response")]
    EmptyResponse,

    #[error("Request cancelled")]
    Cancelled,
}

impl LlmError {
    /// Check if an LLM error is transient and should be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. } | LlmError::Timeout { .. } | LlmError::Connection { .. }
        )
    }
}

/// Errors from tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool not found: {name}")]
    NotFound { name: String },

    #[error("Invalid arguments for tool '{name}': {reason}")]
    InvalidArguments { name: String, reason: String },

    #[error("Tool '{name}' execution failed: {message}")]
    ExecutionFailed { name: String, message: String },

    #[error("Tool '{name}' timed out after {timeout_secs}s")]
    Timeout { name: String, timeout_secs: u64 },

    #[error("Tool '{name}' rate limited")]
    RateLimited { name: String },

    #[error("Tool '{name}' was cancelled")]
    Cancelled { name: String },

    #[error("Tool already registered: {name}")]
    AlreadyRegistered { name: String },
}

impl ToolError {
    /// Transient failures get a single retry before being recorded as a gap.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ToolError::Timeout { .. }
                | ToolError::RateLimited { .. }
                | ToolError::ExecutionFailed { .. }
        )
    }
}

/// Errors from the durable event store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Event store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt event record {path}: {message}")]
    Corrupt { path: PathBuf, message: String },

    #[error("Undecodable event record {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: EventError,
    },

    #[error("Sequence {sequence} already written for session {session_id}")]
    SequenceConflict { session_id: String, sequence: u64 },

    #[error("Invalid session id: {session_id}")]
    InvalidSessionId { session_id: String },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Errors decoding persisted events.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("Unknown event type: {event_type}")]
    UnknownType { event_type: String },

    #[error("Malformed payload for {event_type}: {message}")]
    MalformedPayload { event_type: String, message: String },
}

/// Errors raised while folding events into research state.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("Event for session {found} applied to session {expected}")]
    SessionMismatch { expected: String, found: String },

    #[error("Out-of-order event: expected sequence {expected}, found {found}")]
    OutOfOrder { expected: u64, found: u64 },

    #[error("Invalid transition: {event_type} while {status}")]
    InvalidTransition { event_type: String, status: String },

    #[error("Unknown worker: {perspective}")]
    UnknownWorker { perspective: String },

    #[error("Worker '{perspective}' is {status}, cannot apply {event_type}")]
    InvalidWorkerTransition {
        perspective: String,
        status: String,
        event_type: String,
    },

    #[error("Report already recorded")]
    ReportAlreadySet,

    #[error("Event log is empty")]
    EmptyLog,
}

/// Errors related to configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Configuration file error: {message}")]
    FileError { message: String },
}

/// Result type alias for Quarry operations.
pub type Result<T> = std::result::Result<T, QuarryError>;

//! Error types for the resumatch pipeline.
//!
//! Every error carries an [`ErrorKind`] and a transient/terminal
//! classification. The worker uses the classification to decide between a
//! retry with backoff and an immediate terminal failure.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias using resumatch's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Taxonomy kind reported to external callers.
///
/// Status queries expose only the kind and a message, never the raw
/// underlying error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    ExtractionFailed,
    EmbeddingDimensionMismatch,
    TransientIo,
    Timeout,
    RetriesExhausted,
    InvalidInput,
    Serialization,
    Config,
    Internal,
}

impl ErrorKind {
    /// Stable string form, used for the `error_kind` database column.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::ExtractionFailed => "extraction_failed",
            ErrorKind::EmbeddingDimensionMismatch => "embedding_dimension_mismatch",
            ErrorKind::TransientIo => "transient_io",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Config => "config",
            ErrorKind::Internal => "internal",
        }
    }

    /// Parse the database string form. Unknown values map to `Internal`.
    pub fn parse(s: &str) -> Self {
        match s {
            "not_found" => ErrorKind::NotFound,
            "extraction_failed" => ErrorKind::ExtractionFailed,
            "embedding_dimension_mismatch" => ErrorKind::EmbeddingDimensionMismatch,
            "transient_io" => ErrorKind::TransientIo,
            "timeout" => ErrorKind::Timeout,
            "retries_exhausted" => ErrorKind::RetriesExhausted,
            "invalid_input" => ErrorKind::InvalidInput,
            "serialization" => ErrorKind::Serialization,
            "config" => ErrorKind::Config,
            _ => ErrorKind::Internal,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Core error type for resumatch operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resume record not found in the result store
    #[error("Resume not found: {0}")]
    ResumeNotFound(Uuid),

    /// Task record not found in the queue
    #[error("Job not found: {0}")]
    JobNotFound(Uuid),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// The extraction pipeline could not process the document
    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    /// A vector does not have the process-wide embedding dimension
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    /// Store, broker, or model backend temporarily unreachable
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Operation exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Retry bound reached after repeated transient failures
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: i32, last_error: String },

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Database(e) if is_transient_sqlx(e) => ErrorKind::TransientIo,
            Error::Database(sqlx::Error::RowNotFound) => ErrorKind::NotFound,
            Error::Database(_) => ErrorKind::Internal,
            Error::ResumeNotFound(_) | Error::JobNotFound(_) | Error::NotFound(_) => {
                ErrorKind::NotFound
            }
            Error::ExtractionFailed(_) => ErrorKind::ExtractionFailed,
            Error::EmbeddingDimensionMismatch { .. } => ErrorKind::EmbeddingDimensionMismatch,
            Error::TransientIo(_) | Error::Request(_) => ErrorKind::TransientIo,
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Error::Io(_) => ErrorKind::TransientIo,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            Error::Serialization(_) => ErrorKind::Serialization,
            Error::Config(_) => ErrorKind::Config,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message safe to show callers polling a task.
    ///
    /// Variants wrapping a driver, filesystem, or HTTP error get a fixed
    /// sentence; the wrapped text only goes to the logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::Database(sqlx::Error::RowNotFound) => "record not found".to_string(),
            Error::Database(e) if is_transient_sqlx(e) => {
                "result store temporarily unavailable".to_string()
            }
            Error::Database(_) => "result store error".to_string(),
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                "resume source file not found".to_string()
            }
            Error::Io(_) => "resume source temporarily unreadable".to_string(),
            Error::Request(_) => "model backend temporarily unavailable".to_string(),
            Error::Config(_) => "pipeline is misconfigured".to_string(),
            Error::Serialization(_) => "data could not be decoded".to_string(),
            Error::Internal(_) => "internal error".to_string(),
            _ => self.to_string(),
        }
    }

    /// Whether a job failing with this error should be retried.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::TransientIo | ErrorKind::Timeout)
    }
}

/// Connection-level sqlx failures are retryable; query and data errors are not.
fn is_transient_sqlx(e: &sqlx::Error) -> bool {
    matches!(
        e,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            tracing::debug!(error = %e, "Model backend request timed out");
            Error::Timeout("model backend request timed out".to_string())
        } else {
            Error::Request(e.to_string())
        }
    }
}

//! Audit-related error types.

use thiserror::Error;

/// Errors that can occur while persisting or loading audit entries.
#[derive(Debug, Error)]
pub enum AuditError {
    /// I/O error on the sink file.
    #[error("audit I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A persisted line could not be decoded.
    #[error("corrupt audit record at line {line}: {reason}")]
    CorruptRecord {
        /// One-based line number.
        line: usize,
        /// Decoder message.
        reason: String,
    },

    /// The background sink task panicked or was cancelled.
    #[error("audit sink task failed: {0}")]
    SinkTaskFailed(String),
}

impl From<serde_json::Error> for AuditError {
    fn from(e: serde_json::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

/// Result type for audit operations.
pub type AuditResult<T> = Result<T, AuditError>;

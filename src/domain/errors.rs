//! Domain errors for the verification kernel.

use thiserror::Error;
use uuid::Uuid;

/// Domain-level errors that can occur in the kernel.
///
/// Verifier failures are deliberately absent: they are absorbed into
/// zero-weight verdicts and never reach the caller as an `Err`.
#[derive(Debug, Clone, Error)]
pub enum DomainError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Lesson trigger is not derivable from trace {trace_id}: unmatched terms {unmatched:?}")]
    PatchDerivation { trace_id: Uuid, unmatched: Vec<String> },

    #[error("Correction pipeline is closed")]
    PipelineClosed,

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    Io(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Shorthand for a validation failure.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for a configuration failure.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<std::io::Error> for DomainError {
    fn from(err: std::io::Error) -> Self {
        DomainError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

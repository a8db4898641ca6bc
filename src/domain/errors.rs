//! Domain errors for the taskherd engine.

use thiserror::Error;

/// Domain-level errors that can occur across the control plane and agents.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid status value: {0}")]
    InvalidStatus(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Stream closed")]
    StreamClosed,
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

//! Domain errors for the hubbard-scf orchestrator.

use thiserror::Error;

/// Domain-level errors that can occur while orchestrating a self-consistent run.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal consistency violation: {0}")]
    InternalConsistency(String),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: String, to: String, reason: String },

    #[error("Runner error: {0}")]
    Runner(String),

    /// The runner cannot run this kind of job as configured.
    #[error("Runner misconfigured: {0}")]
    RunnerMisconfigured(String),

    #[error("Unknown job handle: {0}")]
    UnknownJob(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Journal ordering violation: {0}")]
    JournalOrdering(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
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

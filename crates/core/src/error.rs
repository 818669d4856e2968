// Central Error Type for the Application

use crate::domain::JobId;
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Outcome for an already finished phase; brokers redeliver, callers treat it as applied
    #[error("Duplicate chunk: {0}")]
    DuplicateChunk(String),

    /// Unrecoverable: the job was aborted and accepts no further outcome writes
    #[error("Job {0} has been aborted")]
    JobAborted(JobId),

    #[error("Messaging error: {0}")]
    Messaging(#[from] crate::port::SendError),

    #[error("Partitioning error: {0}")]
    Partitioning(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// True for errors raised because the caller sent an outcome that must not be applied
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::Validation(_)
                | AppError::NotFound(_)
                | AppError::DuplicateChunk(_)
                | AppError::Domain(_)
        )
    }
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

// Note: sqlx::Error conversion is handled in the infra-sqlite crate
// by converting to AppError::Database(String)

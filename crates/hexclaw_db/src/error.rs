//! Error types for the state store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stored JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid stored timestamp '{0}'")]
    Timestamp(String),

    #[error("Invalid stored status '{0}'")]
    InvalidStatus(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

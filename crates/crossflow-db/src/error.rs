//! Database error types

use crossflow_types::CrossflowError;
use thiserror::Error;

/// Database operation errors
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Query error: {0}")]
    Query(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::Serialization(e.to_string())
    }
}

impl From<DbError> for CrossflowError {
    fn from(e: DbError) -> Self {
        CrossflowError::store(e.to_string())
    }
}

/// Result type for database operations
pub type DbResult<T> = Result<T, DbError>;

/// Map a raw sqlx failure onto the engine's retriable store error
pub(crate) fn pg(e: sqlx::Error) -> CrossflowError {
    CrossflowError::store(e.to_string())
}

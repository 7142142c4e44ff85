//! Error types for sprout-core

use thiserror::Error;

/// Result type alias using sprout-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sprout-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] libsql::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote gateway failure; treated as transient by the sync engine
    #[error("Remote gateway error: {0}")]
    Remote(String),
}

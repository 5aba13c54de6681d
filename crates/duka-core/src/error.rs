//! Error types for duka-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using duka-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in duka-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// libSQL error
    #[error("libSQL error: {0}")]
    LibSql(#[from] libsql::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record, operation, or conflict not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Remote authority error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}

//! Error types for daybook-core

use thiserror::Error;

/// Result type alias using daybook-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in daybook-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Local persistence error (key-value store read/write)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error from the durable store backend
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Remote store error
    #[error("Remote error: {0}")]
    Remote(#[from] crate::remote::RemoteError),

    /// Queue item not found
    #[error("Queue item not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend failed (I/O, unavailable, ...).
    #[error("storage backend error: {0}")]
    Backend(String),

    /// A corruption was detected.
    #[error("corruption detected: {0}")]
    Corruption(String),
}

impl StorageError {
    /// Returns true if the item simply does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// A specialized Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Entry not found.
    #[error("entry not found: {0}")]
    NotFound(String),

    /// Entry already exists.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Failed to open or migrate a backend connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A query or statement failed against the backend.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Caller-supplied input was rejected before reaching the backend.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Transaction error.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// Generic I/O error.
    #[error("io error: {0}")]
    Io(String),
}

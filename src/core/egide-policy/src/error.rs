//! Policy engine error types.

use thiserror::Error;

/// Errors that can occur during policy operations.
#[derive(Debug, Error)]
pub enum PolicyError {
    /// Policy with this name already exists.
    #[error("policy already exists: {0}")]
    AlreadyExists(String),

    /// No policy by this name.
    #[error("policy not found: {0}")]
    NotFound(String),

    /// Policy document failed validation (bad glob, bad condition syntax).
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<egide_storage::StorageError> for PolicyError {
    fn from(e: egide_storage::StorageError) -> Self {
        PolicyError::Storage(e.to_string())
    }
}

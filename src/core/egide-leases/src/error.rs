//! Lease manager error types.

use thiserror::Error;

/// Errors that can occur in the lease manager.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Lease not found.
    #[error("lease not found: {0}")]
    NotFound(String),

    /// No engine is registered for the requested engine type.
    #[error("no engine registered for type: {0}")]
    UnknownEngine(String),

    /// The lease is not in a state that permits the requested operation.
    #[error("lease {id} is {status}, expected a renewable active lease")]
    NotRenewable {
        /// Lease id.
        id: String,
        /// Current status.
        status: String,
    },

    /// The engine driver's renew call failed. The lease is left untouched.
    #[error("renew failed: {0}")]
    RenewFailed(String),

    /// The engine driver's revoke call failed.
    #[error("revoke failed: {0}")]
    RevokeFailed(String),

    /// Invalid lease attributes supplied to `create_lease`.
    #[error("invalid lease attributes: {0}")]
    InvalidAttrs(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<egide_storage::StorageError> for LeaseError {
    fn from(e: egide_storage::StorageError) -> Self {
        LeaseError::Storage(e.to_string())
    }
}

impl From<egide_audit::AuditError> for LeaseError {
    fn from(e: egide_audit::AuditError) -> Self {
        LeaseError::Storage(e.to_string())
    }
}

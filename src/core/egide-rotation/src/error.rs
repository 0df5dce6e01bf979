//! Rotation scheduler error types.

use thiserror::Error;

/// Errors that can occur in the rotation scheduler.
#[derive(Debug, Error)]
pub enum RotationError {
    /// Schedule not found.
    #[error("rotation schedule not found: {0}")]
    NotFound(String),

    /// No rotation target is registered for the schedule's `target_kind`.
    #[error("no rotation target registered for kind: {0}")]
    UnknownTarget(String),

    /// The supplied cron expression could not be parsed.
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),

    /// Committing the new credential failed; nothing was changed.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// Revoking the old credential failed after the new one committed.
    #[error("revoke of old credential failed: {0}")]
    RevokeFailed(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<egide_storage::StorageError> for RotationError {
    fn from(e: egide_storage::StorageError) -> Self {
        RotationError::Storage(e.to_string())
    }
}

impl From<egide_audit::AuditError> for RotationError {
    fn from(e: egide_audit::AuditError) -> Self {
        RotationError::Storage(e.to_string())
    }
}

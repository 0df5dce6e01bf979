//! Audit log error types.

use thiserror::Error;

/// Errors that can occur during audit log operations.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Three successive retries all lost the race for the next `seq`.
    #[error("audit conflict: could not reserve next sequence number after 3 retries")]
    Conflict,

    /// The requested append or append-carrying operation timed out.
    #[error("audit log unavailable")]
    Unavailable,

    /// `verify_chain` found a broken link.
    #[error("audit chain broken at seq {seq}: {reason}")]
    ChainBroken {
        /// The first sequence number that failed verification.
        seq: i64,
        /// What went wrong (hash mismatch, prev_hash mismatch, gap).
        reason: String,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] egide_crypto::CryptoError),
}

impl From<egide_storage::StorageError> for AuditError {
    fn from(e: egide_storage::StorageError) -> Self {
        AuditError::Storage(e.to_string())
    }
}

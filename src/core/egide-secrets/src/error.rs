//! Secrets engine error types.

use thiserror::Error;

/// Errors that can occur in the Secrets Engine.
#[derive(Debug, Error)]
pub enum SecretsError {
    /// Secret not found.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// Secret version not found.
    #[error("secret version not found: {path} v{version}")]
    VersionNotFound {
        /// Secret path.
        path: String,
        /// Version number.
        version: u32,
    },

    /// Secret has expired.
    #[error("secret has expired: {0}")]
    Expired(String),

    /// Invalid secret path.
    #[error("invalid secret path: {0}")]
    InvalidPath(String),

    /// A path that must be unique already has a live secret.
    #[error("secret already exists: {0}")]
    AlreadyExists(String),

    /// The vault is sealed; no key material is available.
    #[error("vault is sealed")]
    Sealed,

    /// The requesting entity's policy evaluation denied the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// Decryption failed. Deliberately opaque: the caller learns only that
    /// the ciphertext did not authenticate, never why.
    #[error("failed to decrypt secret")]
    DecryptFailed,

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(#[from] egide_crypto::CryptoError),
}

impl From<egide_storage::StorageError> for SecretsError {
    fn from(e: egide_storage::StorageError) -> Self {
        SecretsError::Storage(e.to_string())
    }
}

impl From<egide_seal::SealError> for SecretsError {
    fn from(e: egide_seal::SealError) -> Self {
        match e {
            egide_seal::SealError::Sealed => SecretsError::Sealed,
            other => SecretsError::Storage(other.to_string()),
        }
    }
}

impl From<egide_audit::AuditError> for SecretsError {
    fn from(e: egide_audit::AuditError) -> Self {
        SecretsError::Storage(e.to_string())
    }
}

impl From<egide_policy::PolicyError> for SecretsError {
    fn from(e: egide_policy::PolicyError) -> Self {
        SecretsError::Storage(e.to_string())
    }
}

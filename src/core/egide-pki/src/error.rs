//! PKI engine error types.

use thiserror::Error;

/// Errors that can occur in the PKI Engine.
#[derive(Debug, Error)]
pub enum PkiError {
    /// Certificate Authority not initialized.
    #[error("CA not initialized")]
    CaNotInitialized,

    /// Certificate not found.
    #[error("certificate not found: {0}")]
    CertificateNotFound(String),

    /// Certificate has been revoked.
    #[error("certificate revoked: {0}")]
    CertificateRevoked(String),

    /// Certificate has expired.
    #[error("certificate expired: {0}")]
    CertificateExpired(String),

    /// Invalid certificate request.
    #[error("invalid certificate request: {0}")]
    InvalidRequest(String),

    /// Template not found.
    #[error("template not found: {0}")]
    TemplateNotFound(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(#[from] egide_crypto::CryptoError),
}

impl From<egide_storage::StorageError> for PkiError {
    fn from(e: egide_storage::StorageError) -> Self {
        PkiError::Storage(e.to_string())
    }
}

impl From<egide_seal::SealError> for PkiError {
    fn from(e: egide_seal::SealError) -> Self {
        match e {
            egide_seal::SealError::Sealed => PkiError::CaNotInitialized,
            other => PkiError::Storage(other.to_string()),
        }
    }
}

impl From<rcgen::Error> for PkiError {
    fn from(e: rcgen::Error) -> Self {
        PkiError::InvalidRequest(e.to_string())
    }
}

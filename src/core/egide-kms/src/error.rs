//! KMS engine error types.

use thiserror::Error;

/// Errors that can occur while wrapping or unwrapping the master key with an
/// external KMS.
#[derive(Debug, Error)]
pub enum KmsError {
    /// The configured provider rejected the wrap request.
    #[error("kms wrap failed: {0}")]
    WrapFailed(String),

    /// The configured provider rejected the unwrap request, or the blob did
    /// not decrypt under the expected key.
    #[error("kms unwrap failed: {0}")]
    UnwrapFailed(String),

    /// No KMS provider is configured (provider is [`KmsProvider::None`]).
    #[error("no kms provider configured")]
    NotConfigured,

    /// Cryptographic error.
    #[error("crypto error: {0}")]
    Crypto(#[from] egide_crypto::CryptoError),
}

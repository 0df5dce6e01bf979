//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur during cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key generation failed.
    #[error("key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption failed.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Signature creation failed.
    #[error("signature creation failed: {0}")]
    SignatureFailed(String),

    /// Signature verification failed.
    #[error("signature verification failed")]
    VerificationFailed,

    /// Invalid key format or size.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid input data.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Fewer than the threshold number of distinct shares were supplied.
    #[error("insufficient shares: need {needed}, got {got}")]
    InsufficientShares {
        /// Threshold required to reconstruct.
        needed: u8,
        /// Number of distinct shares supplied.
        got: u8,
    },

    /// Two shares with the same x-coordinate were supplied.
    #[error("duplicate share at index {0}")]
    DuplicateShare(u8),

    /// A share's encoding could not be parsed.
    #[error("malformed share: {0}")]
    BadShare(String),
}

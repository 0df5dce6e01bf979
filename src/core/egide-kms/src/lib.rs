//! # Egide KMS
//!
//! Auto-unseal support: wraps and unwraps the vault master key with an
//! external key management service instead of (or alongside) Shamir shares.
//!
//! This crate does not manage arbitrary customer keys; it exists solely to
//! give `egide-seal` a [`KmsUnseal`] it can call during initialization and
//! startup.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;

pub mod error;

pub use error::KmsError;

/// The external key management service backing auto-unseal, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KmsProvider {
    /// Auto-unseal is disabled; the vault relies on Shamir shares only.
    None,
    /// AWS KMS, identified by key ARN or alias.
    AwsKms {
        /// Key ARN or alias used to wrap/unwrap the master key.
        key_id: String,
    },
    /// Google Cloud KMS, identified by full resource name.
    GcpKms {
        /// Fully qualified `projects/.../cryptoKeys/...` resource name.
        key_name: String,
    },
    /// Azure Key Vault, identified by vault URL and key name.
    AzureKeyVault {
        /// Vault URL, e.g. `https://my-vault.vault.azure.net`.
        vault_url: String,
        /// Key name within the vault.
        key_name: String,
    },
}

/// Wraps and unwraps opaque key material with an external KMS.
///
/// `egide-seal` uses this to protect the vault master key without requiring
/// operators to hold Shamir shares. Implementations are expected to call out
/// to the provider named by their [`KmsProvider`]; none are bundled here.
#[async_trait]
pub trait KmsUnseal: Send + Sync {
    /// Encrypts `plaintext` (the master key) under the external KMS key,
    /// returning an opaque blob safe to persist.
    async fn wrap(&self, plaintext: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// Decrypts a blob previously produced by [`KmsUnseal::wrap`].
    async fn unwrap(&self, blob: &[u8]) -> Result<Vec<u8>, KmsError>;

    /// The provider this instance talks to, for status reporting.
    fn provider(&self) -> KmsProvider;
}

//! # Egide API
//!
//! Error aggregation for Egide's core engines.
//!
//! This crate has no transport of its own (see the workspace's `Non-goals`);
//! it exists so request handlers in `egide-server` can propagate any core
//! engine's error through a single type with `?`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use thiserror::Error;

/// Aggregates every core engine's error type behind one `?`-friendly enum.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Secrets engine error.
    #[error(transparent)]
    Secrets(#[from] egide_secrets::SecretsError),

    /// Lease manager error.
    #[error(transparent)]
    Leases(#[from] egide_leases::LeaseError),

    /// Policy engine error.
    #[error(transparent)]
    Policy(#[from] egide_policy::PolicyError),

    /// Rotation scheduler error.
    #[error(transparent)]
    Rotation(#[from] egide_rotation::RotationError),

    /// KMS engine error.
    #[error(transparent)]
    Kms(#[from] egide_kms::KmsError),

    /// PKI engine error.
    #[error(transparent)]
    Pki(#[from] egide_pki::PkiError),

    /// Seal/unseal error.
    #[error(transparent)]
    Seal(#[from] egide_seal::SealError),

    /// Audit log error.
    #[error(transparent)]
    Audit(#[from] egide_audit::AuditError),

    /// Authentication/authorization error.
    #[error(transparent)]
    Auth(#[from] egide_auth::AuthError),
}

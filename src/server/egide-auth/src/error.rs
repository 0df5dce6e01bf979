//! Authentication error types.

use thiserror::Error;

/// Errors that can occur during authentication.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid credentials (bad token, wrong password, etc.).
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Token has expired.
    #[error("token expired")]
    TokenExpired,

    /// Token not found (no hash stored).
    #[error("token not found")]
    TokenNotFound,

    /// Missing authentication token.
    #[error("missing authentication token")]
    MissingToken,

    /// Permission denied for the requested operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Invalid policy configuration.
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    /// Authentication method not enabled.
    #[error("auth method not enabled: {0}")]
    MethodNotEnabled(String),

    /// Backend configuration error.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Agent not found.
    #[error("agent not found: {0}")]
    AgentNotFound(String),

    /// Agent with this `external_id` already registered.
    #[error("agent already registered: {0}")]
    AgentAlreadyExists(String),

    /// Requested transition is not valid from the agent's current status.
    #[error("invalid agent state transition: {0}")]
    InvalidAgentState(String),

    /// PKI engine error encountered while issuing/revoking a certificate.
    #[error("pki error: {0}")]
    Pki(String),
}

impl From<egide_pki::PkiError> for AuthError {
    fn from(e: egide_pki::PkiError) -> Self {
        AuthError::Pki(e.to_string())
    }
}

impl From<egide_audit::AuditError> for AuthError {
    fn from(e: egide_audit::AuditError) -> Self {
        AuthError::Storage(e.to_string())
    }
}

impl From<egide_storage::StorageError> for AuthError {
    fn from(e: egide_storage::StorageError) -> Self {
        AuthError::Storage(e.to_string())
    }
}

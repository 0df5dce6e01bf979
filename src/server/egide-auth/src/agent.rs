//! Agent registry and AppRole authentication backend.
//!
//! Agents (the applications that pull secrets) register once, then bootstrap
//! into a long-lived identity through a `role_id`/`secret_id` pair: `role_id`
//! is stored verbatim, `secret_id` is stored only as an HMAC so a leaked
//! database dump doesn't hand out working credentials. A successful
//! authentication issues a short-lived client certificate from the vault's
//! internal CA and records its fingerprint on the agent.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use egide_audit::{AuditEvent, AuditHandle};
use egide_crypto::{kdf, random, sign};
use egide_pki::CertificateAuthority;
use egide_seal::SealHandle;
use egide_storage_sqlite::SqliteBackend;
use serde_json::json;
use tracing::warn;

use crate::{AuthBackend, AuthContext, AuthError, AuthMethod};

/// Context string binding the HKDF-derived secret_id HMAC key to its purpose.
const APPROLE_HMAC_KEY_INFO: &[u8] = b"egide-auth-approle-secret-id-v1";

/// Default validity of an agent client certificate issued on authentication.
const DEFAULT_CERT_VALIDITY: StdDuration = StdDuration::from_secs(3600);

/// Lifecycle status of a registered agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStatus {
    /// Registered but has not yet completed AppRole bootstrap.
    PendingBootstrap,
    /// Authenticated at least once and currently reachable.
    Active,
    /// Missed its heartbeat window; can reactivate on the next heartbeat.
    Disconnected,
    /// Temporarily barred from authenticating; reversible.
    Suspended,
    /// Permanently barred; cannot re-authenticate.
    Revoked,
}

impl AgentStatus {
    fn as_str(self) -> &'static str {
        match self {
            AgentStatus::PendingBootstrap => "pending_bootstrap",
            AgentStatus::Active => "active",
            AgentStatus::Disconnected => "disconnected",
            AgentStatus::Suspended => "suspended",
            AgentStatus::Revoked => "revoked",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "active" => AgentStatus::Active,
            "disconnected" => AgentStatus::Disconnected,
            "suspended" => AgentStatus::Suspended,
            "revoked" => AgentStatus::Revoked,
            _ => AgentStatus::PendingBootstrap,
        }
    }
}

/// A registered agent identity.
#[derive(Debug, Clone)]
pub struct Agent {
    /// Internal primary key.
    pub id: String,
    /// Caller-supplied unique external identifier.
    pub external_id: String,
    /// Human-readable name.
    pub name: String,
    /// Declared auth method, e.g. `"approle"`.
    pub auth_method: String,
    /// Current lifecycle status.
    pub status: AgentStatus,
    /// Opaque role_id once AppRole credentials have been generated.
    pub role_id: Option<String>,
    /// Fingerprint of the most recently issued client certificate.
    pub cert_fingerprint: Option<String>,
    /// Unix timestamp (seconds) the agent was registered.
    pub created_at: i64,
    /// Unix timestamp (seconds) of the last heartbeat, if any.
    pub last_heartbeat_at: Option<i64>,
}

/// `role_id`/`secret_id` pair returned once from [`AgentRegistry::generate_approle_credentials`].
#[derive(Debug, Clone)]
pub struct AppRoleCredentials {
    /// Stored verbatim; identifies the agent on subsequent logins.
    pub role_id: String,
    /// Never stored; the caller must save this, only its HMAC is kept.
    pub secret_id: String,
}

/// Result of a successful [`AgentRegistry::authenticate_with_approle`] call.
#[derive(Debug, Clone)]
pub struct AppRoleLogin {
    /// The agent that authenticated.
    pub agent: Agent,
    /// PEM-encoded leaf certificate issued for this session.
    pub certificate_pem: String,
    /// PEM-encoded private key, returned once.
    pub private_key_pem: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct AgentRow {
    id: String,
    external_id: String,
    name: String,
    auth_method: String,
    status: String,
    role_id: String,
    secret_id_hmac: String,
    cert_fingerprint: String,
    created_at: i64,
    last_heartbeat_at: Option<i64>,
}

impl From<AgentRow> for Agent {
    fn from(row: AgentRow) -> Self {
        Agent {
            id: row.id,
            external_id: row.external_id,
            name: row.name,
            auth_method: row.auth_method,
            status: AgentStatus::parse(&row.status),
            role_id: (!row.role_id.is_empty()).then_some(row.role_id),
            cert_fingerprint: (!row.cert_fingerprint.is_empty()).then_some(row.cert_fingerprint),
            created_at: row.created_at,
            last_heartbeat_at: row.last_heartbeat_at,
        }
    }
}

/// Owns the agent table, the AppRole secret_id HMAC key, and the PKI engine
/// used to issue session certificates.
pub struct AgentRegistry {
    storage: SqliteBackend,
    seal: SealHandle,
    pki: Arc<CertificateAuthority>,
    audit: AuditHandle,
}

impl AgentRegistry {
    /// Opens (creating if necessary) the agent registry at `data_path`.
    pub async fn open(
        data_path: impl AsRef<std::path::Path>,
        seal: SealHandle,
        pki: Arc<CertificateAuthority>,
        audit: AuditHandle,
    ) -> Result<Self, AuthError> {
        let storage = SqliteBackend::open(data_path, "agents").await?;
        let registry = Self {
            storage,
            seal,
            pki,
            audit,
        };
        registry.migrate().await?;
        Ok(registry)
    }

    async fn migrate(&self) -> Result<(), AuthError> {
        self.storage
            .execute_raw(
                r#"
                CREATE TABLE IF NOT EXISTS agents (
                    id               TEXT PRIMARY KEY,
                    external_id      TEXT NOT NULL UNIQUE,
                    name             TEXT NOT NULL,
                    auth_method      TEXT NOT NULL,
                    status           TEXT NOT NULL,
                    role_id          TEXT NOT NULL DEFAULT '',
                    secret_id_hmac   TEXT NOT NULL DEFAULT '',
                    cert_fingerprint TEXT NOT NULL DEFAULT '',
                    created_at       INTEGER NOT NULL,
                    last_heartbeat_at INTEGER
                )
                "#,
            )
            .await?;
        Ok(())
    }

    /// Registers a new agent in `pending_bootstrap` status.
    pub async fn register_agent(&self, external_id: &str, name: &str, auth_method: &str) -> Result<Agent, AuthError> {
        if self.fetch_by_external_id(external_id).await?.is_some() {
            return Err(AuthError::AgentAlreadyExists(external_id.to_string()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let created_at = now();
        self.storage
            .execute(
                "INSERT INTO agents (id, external_id, name, auth_method, status, created_at) VALUES (?, ?, ?, ?, ?, ?)",
                &[&id, external_id, name, auth_method, AgentStatus::PendingBootstrap.as_str(), &created_at.to_string()],
            )
            .await?;

        self.audit(
            "agent.registered",
            external_id,
            true,
            None,
            json!({"auth_method": auth_method}),
        )
        .await?;

        Ok(Agent {
            id,
            external_id: external_id.to_string(),
            name: name.to_string(),
            auth_method: auth_method.to_string(),
            status: AgentStatus::PendingBootstrap,
            role_id: None,
            cert_fingerprint: None,
            created_at,
            last_heartbeat_at: None,
        })
    }

    /// Generates and persists a fresh `role_id`/`secret_id` pair. The
    /// `secret_id` is returned once and never stored; only its HMAC is kept.
    pub async fn generate_approle_credentials(&self, external_id: &str) -> Result<AppRoleCredentials, AuthError> {
        let row = self
            .fetch_by_external_id(external_id)
            .await?
            .ok_or_else(|| AuthError::AgentNotFound(external_id.to_string()))?;

        let role_id = random::generate_token(16);
        let secret_id = random::generate_token(16);
        let secret_id_hmac = self.hmac_secret_id(&secret_id).await?;

        self.storage
            .execute(
                "UPDATE agents SET role_id = ?, secret_id_hmac = ? WHERE id = ?",
                &[&role_id, &secret_id_hmac, &row.id],
            )
            .await?;

        self.audit("agent.approle_credentials_generated", external_id, true, None, json!({}))
            .await?;

        Ok(AppRoleCredentials { role_id, secret_id })
    }

    /// Validates `role_id`/`secret_id`, rejects suspended/revoked agents, and
    /// on success activates the agent and issues a fresh client certificate.
    pub async fn authenticate_with_approle(&self, role_id: &str, secret_id: &str) -> Result<AppRoleLogin, AuthError> {
        let row: Option<AgentRow> = self
            .storage
            .query_one(
                "SELECT id, external_id, name, auth_method, status, role_id, secret_id_hmac, cert_fingerprint, created_at, last_heartbeat_at \
                 FROM agents WHERE role_id = ?",
                &[role_id],
            )
            .await?;
        let row = row.ok_or(AuthError::InvalidCredentials)?;

        let expected_hmac = self.hmac_secret_id(secret_id).await?;
        if !constant_time_eq(&row.secret_id_hmac, &expected_hmac) {
            return Err(AuthError::InvalidCredentials);
        }

        let status = AgentStatus::parse(&row.status);
        if matches!(status, AgentStatus::Suspended | AgentStatus::Revoked) {
            self.audit(
                "agent.authentication_denied",
                &row.external_id,
                false,
                Some(format!("agent status is {}", status.as_str())),
                json!({}),
            )
            .await?;
            return Err(AuthError::PermissionDenied(format!(
                "agent {} is {}",
                row.external_id,
                status.as_str()
            )));
        }

        let issued = self
            .pki
            .issue_agent_certificate(&row.external_id, DEFAULT_CERT_VALIDITY)
            .await?;

        self.storage
            .execute(
                "UPDATE agents SET status = ?, cert_fingerprint = ?, last_heartbeat_at = ? WHERE id = ?",
                &[
                    AgentStatus::Active.as_str(),
                    &issued.fingerprint,
                    &now().to_string(),
                    &row.id,
                ],
            )
            .await?;

        self.audit(
            "agent.authenticated",
            &row.external_id,
            true,
            None,
            json!({"cert_fingerprint": issued.fingerprint}),
        )
        .await?;

        let agent = Agent {
            status: AgentStatus::Active,
            cert_fingerprint: Some(issued.fingerprint),
            ..Agent::from(row)
        };

        Ok(AppRoleLogin {
            agent,
            certificate_pem: issued.certificate_pem,
            private_key_pem: issued.private_key_pem,
        })
    }

    /// Bumps `last_heartbeat_at`; reactivates a `disconnected` agent.
    pub async fn update_heartbeat(&self, external_id: &str) -> Result<Agent, AuthError> {
        let row = self
            .fetch_by_external_id(external_id)
            .await?
            .ok_or_else(|| AuthError::AgentNotFound(external_id.to_string()))?;

        let status = AgentStatus::parse(&row.status);
        let new_status = if status == AgentStatus::Disconnected {
            AgentStatus::Active
        } else {
            status
        };

        self.storage
            .execute(
                "UPDATE agents SET status = ?, last_heartbeat_at = ? WHERE id = ?",
                &[new_status.as_str(), &now().to_string(), &row.id],
            )
            .await?;

        Ok(Agent {
            status: new_status,
            last_heartbeat_at: Some(now()),
            ..Agent::from(row)
        })
    }

    /// Marks an agent `disconnected`.
    pub async fn mark_disconnected(&self, external_id: &str) -> Result<Agent, AuthError> {
        self.transition(external_id, AgentStatus::Disconnected, "agent.disconnected")
            .await
    }

    /// Marks an agent `suspended`; reversible via re-authentication is not
    /// possible until an operator clears the suspension.
    pub async fn suspend_agent(&self, external_id: &str) -> Result<Agent, AuthError> {
        self.transition(external_id, AgentStatus::Suspended, "agent.suspended")
            .await
    }

    /// Permanently revokes an agent and its current certificate.
    pub async fn revoke_agent(&self, external_id: &str) -> Result<Agent, AuthError> {
        let agent = self
            .transition(external_id, AgentStatus::Revoked, "agent.revoked")
            .await?;
        if let Some(fingerprint) = &agent.cert_fingerprint {
            self.pki
                .revoke(fingerprint, egide_pki::RevocationReason::AgentRevoked)
                .await?;
        }
        Ok(agent)
    }

    /// Revokes an agent's current client certificate without changing its
    /// registry status (e.g. on suspected key compromise).
    pub async fn revoke_agent_certificate(&self, external_id: &str) -> Result<(), AuthError> {
        let row = self
            .fetch_by_external_id(external_id)
            .await?
            .ok_or_else(|| AuthError::AgentNotFound(external_id.to_string()))?;

        if row.cert_fingerprint.is_empty() {
            return Ok(());
        }

        self.pki
            .revoke(&row.cert_fingerprint, egide_pki::RevocationReason::Compromised)
            .await?;

        self.audit(
            "agent.certificate_revoked",
            external_id,
            true,
            None,
            json!({"fingerprint": row.cert_fingerprint}),
        )
        .await?;

        Ok(())
    }

    async fn transition(&self, external_id: &str, status: AgentStatus, event_type: &str) -> Result<Agent, AuthError> {
        let row = self
            .fetch_by_external_id(external_id)
            .await?
            .ok_or_else(|| AuthError::AgentNotFound(external_id.to_string()))?;

        self.storage
            .execute("UPDATE agents SET status = ? WHERE id = ?", &[status.as_str(), &row.id])
            .await?;

        self.audit(event_type, external_id, true, None, json!({})).await?;

        Ok(Agent {
            status,
            ..Agent::from(row)
        })
    }

    async fn fetch_by_external_id(&self, external_id: &str) -> Result<Option<AgentRow>, AuthError> {
        let row = self
            .storage
            .query_one(
                "SELECT id, external_id, name, auth_method, status, role_id, secret_id_hmac, cert_fingerprint, created_at, last_heartbeat_at \
                 FROM agents WHERE external_id = ?",
                &[external_id],
            )
            .await?;
        Ok(row)
    }

    async fn hmac_secret_id(&self, secret_id: &str) -> Result<String, AuthError> {
        let mk_bytes = self
            .seal
            .with_master_key(|mk| mk.as_bytes().to_vec())
            .await
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        let key = kdf::derive_key(&mk_bytes, None, APPROLE_HMAC_KEY_INFO, 32)
            .map_err(|e| AuthError::Storage(e.to_string()))?;
        let tag = sign::sign(&key, secret_id.as_bytes()).map_err(|e| AuthError::Storage(e.to_string()))?;
        Ok(hex_encode(tag))
    }

    async fn audit(
        &self,
        event_type: &str,
        external_id: &str,
        access_granted: bool,
        denial_reason: Option<String>,
        event_data: serde_json::Value,
    ) -> Result<(), AuthError> {
        self.audit
            .append(AuditEvent {
                event_type: event_type.to_string(),
                actor_type: "agent".to_string(),
                actor_id: external_id.to_string(),
                target: Some(external_id.to_string()),
                access_granted,
                denial_reason,
                correlation_id: String::new(),
                event_data: event_data.to_string(),
            })
            .await?;
        Ok(())
    }
}

/// [`AuthBackend`] adapter around [`AgentRegistry::authenticate_with_approle`]
/// for request handlers that expect a single opaque token. The token is the
/// `role_id` and `secret_id` joined by a single `.`.
pub struct AppRoleBackend {
    registry: Arc<AgentRegistry>,
}

impl AppRoleBackend {
    /// Creates a new AppRole backend over `registry`.
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl AuthBackend for AppRoleBackend {
    async fn validate(&self, token: &str) -> Result<AuthContext, AuthError> {
        let (role_id, secret_id) = token.split_once('.').ok_or(AuthError::InvalidCredentials)?;
        let login = self.registry.authenticate_with_approle(role_id, secret_id).await?;

        Ok(AuthContext {
            account_id: login.agent.external_id,
            email: None,
            display_name: Some(login.agent.name),
            auth_method: AuthMethod::AppRole,
            expires_at: None,
        })
    }

    fn name(&self) -> &'static str {
        "approle"
    }
}

/// Compares two hex strings in constant time.
fn constant_time_eq(a: &str, b: &str) -> bool {
    use subtle::ConstantTimeEq;
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let bytes = bytes.as_ref();
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0x0F) as usize] as char);
    }
    hex
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_secs() as i64
}

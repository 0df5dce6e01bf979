//! # Egide Secrets
//!
//! Envelope-encrypted, versioned key/value secret store.
//!
//! Every secret is encrypted under its own per-write data encryption key
//! (DEK), itself wrapped under the live master key. Updates archive the
//! prior version rather than overwriting it, so [`SecretStore::rollback`]
//! and [`SecretStore::prune_old_versions`] have history to work with.
//! Reads routed through [`SecretStore::get_secret_for_entity`] are gated by
//! an `egide-policy` access decision and recorded in the audit log either
//! way.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;

use std::path::Path;

use base64::Engine;
use egide_audit::{AuditEvent, AuditHandle};
use egide_policy::{Decision, Operation, PolicyStore, RequestContext};
use egide_seal::SealHandle;
use egide_storage_sqlite::SqliteBackend;
use serde_json::json;
use tracing::debug;
use zeroize::Zeroizing;

pub use error::SecretsError;

const B64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

/// A live secret's metadata, without its plaintext value.
#[derive(Debug, Clone)]
pub struct SecretRecord {
    /// Unique path identifying the secret.
    pub path: String,
    /// Caller-supplied kind tag, e.g. `"generic"`, `"database-credential"`.
    pub kind: String,
    /// Current version number. Starts at 1.
    pub version: u32,
    /// Arbitrary caller-supplied metadata.
    pub metadata: serde_json::Value,
    /// Unix timestamp (seconds) the secret was first created.
    pub created_at: i64,
    /// Unix timestamp (seconds) of the most recent write.
    pub updated_at: i64,
}

/// A decrypted secret: its record plus plaintext.
pub struct DecryptedSecret {
    /// The secret's current metadata.
    pub record: SecretRecord,
    /// Decrypted payload, zeroized on drop.
    pub data: Zeroizing<Vec<u8>>,
}

/// Outcome of [`SecretStore::prune_old_versions`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PruneResult {
    /// Number of archived versions removed.
    pub deleted: u32,
    /// Number of archived versions retained.
    pub kept: u32,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SecretRow {
    path: String,
    kind: String,
    version: i64,
    wrapped_dek: String,
    ciphertext: String,
    metadata: String,
    created_at: i64,
    updated_at: i64,
}

impl SecretRow {
    fn into_record(self) -> Result<SecretRecord, SecretsError> {
        let metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| SecretsError::Storage(format!("corrupt secret metadata: {e}")))?;
        Ok(SecretRecord {
            path: self.path,
            kind: self.kind,
            version: self.version as u32,
            metadata,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct VersionRow {
    version: i64,
    wrapped_dek: String,
    ciphertext: String,
    archived_at: i64,
}

/// Owns the secret tables and coordinates envelope encryption, policy
/// checks, and audit logging around them.
pub struct SecretStore {
    storage: SqliteBackend,
    seal: SealHandle,
    policy: PolicyStore,
    audit: AuditHandle,
}

impl SecretStore {
    /// Opens (creating if necessary) the secret store at `data_path`.
    pub async fn open(
        data_path: impl AsRef<Path>,
        seal: SealHandle,
        policy: PolicyStore,
        audit: AuditHandle,
    ) -> Result<Self, SecretsError> {
        let storage = SqliteBackend::open(data_path, "secrets").await?;
        let store = Self {
            storage,
            seal,
            policy,
            audit,
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), SecretsError> {
        self.storage
            .execute_raw(
                r#"
                CREATE TABLE IF NOT EXISTS secrets (
                    path         TEXT PRIMARY KEY,
                    kind         TEXT NOT NULL,
                    version      INTEGER NOT NULL,
                    wrapped_dek  TEXT NOT NULL,
                    ciphertext   TEXT NOT NULL,
                    metadata     TEXT NOT NULL,
                    created_at   INTEGER NOT NULL,
                    updated_at   INTEGER NOT NULL
                )
                "#,
            )
            .await?;
        self.storage
            .execute_raw(
                r#"
                CREATE TABLE IF NOT EXISTS secret_versions (
                    path         TEXT NOT NULL,
                    version      INTEGER NOT NULL,
                    wrapped_dek  TEXT NOT NULL,
                    ciphertext   TEXT NOT NULL,
                    archived_at  INTEGER NOT NULL,
                    PRIMARY KEY (path, version)
                )
                "#,
            )
            .await?;
        Ok(())
    }

    /// Creates a new secret at `path`. Fails if a live secret already
    /// occupies `path`, or if the vault is sealed.
    pub async fn create(
        &self,
        path: &str,
        kind: &str,
        data: &[u8],
        metadata: serde_json::Value,
    ) -> Result<SecretRecord, SecretsError> {
        if self.fetch_row(path).await?.is_some() {
            return Err(SecretsError::AlreadyExists(path.to_string()));
        }

        let mk = self.master_key().await?;
        let dek = egide_crypto::random::generate_key();
        let aad = aad_for(path, 1);
        let ciphertext = egide_crypto::aead::encrypt(&*dek, data, Some(aad.as_bytes()))?;
        let wrapped_dek = egide_crypto::aead::encrypt(&mk, &*dek, Some(path.as_bytes()))?;

        let now = now();
        let metadata_json = serde_json::to_string(&metadata)
            .map_err(|e| SecretsError::Storage(format!("invalid metadata: {e}")))?;

        self.storage
            .execute(
                r#"
                INSERT INTO secrets
                    (path, kind, version, wrapped_dek, ciphertext, metadata, created_at, updated_at)
                VALUES (?, ?, 1, ?, ?, ?, ?, ?)
                "#,
                &[
                    path,
                    kind,
                    &B64.encode(&wrapped_dek),
                    &B64.encode(&ciphertext),
                    &metadata_json,
                    &now.to_string(),
                    &now.to_string(),
                ],
            )
            .await?;

        self.audit
            .append(AuditEvent {
                event_type: "secret.created".to_string(),
                actor_type: "system".to_string(),
                actor_id: "secrets-engine".to_string(),
                target: Some(path.to_string()),
                access_granted: true,
                denial_reason: None,
                correlation_id: String::new(),
                event_data: json!({ "path": path, "kind": kind, "version": 1 }).to_string(),
            })
            .await?;

        debug!(path, "secret created");

        Ok(SecretRecord {
            path: path.to_string(),
            kind: kind.to_string(),
            version: 1,
            metadata,
            created_at: now,
            updated_at: now,
        })
    }

    /// Decrypts and returns the current value of the secret at `path`.
    pub async fn read_decrypted(&self, path: &str) -> Result<DecryptedSecret, SecretsError> {
        let row = self
            .fetch_row(path)
            .await?
            .ok_or_else(|| SecretsError::NotFound(path.to_string()))?;

        let mk = self.master_key().await?;
        let wrapped_dek = B64
            .decode(&row.wrapped_dek)
            .map_err(|e| SecretsError::Storage(format!("corrupt wrapped dek: {e}")))?;
        let ciphertext = B64
            .decode(&row.ciphertext)
            .map_err(|e| SecretsError::Storage(format!("corrupt ciphertext: {e}")))?;
        let version = row.version as u32;

        let data = self
            .unwrap_and_decrypt(&mk, path, version, &wrapped_dek, &ciphertext)
            .await?;

        let record = row.into_record()?;
        Ok(DecryptedSecret { record, data })
    }

    /// Writes a new value for the secret at `path`, archiving the current
    /// version. Returns the updated record.
    pub async fn update(&self, path: &str, new_data: &[u8]) -> Result<SecretRecord, SecretsError> {
        let row = self
            .fetch_row(path)
            .await?
            .ok_or_else(|| SecretsError::NotFound(path.to_string()))?;

        let current_version = row.version as u32;
        let new_version = current_version + 1;

        self.storage
            .execute(
                "INSERT INTO secret_versions (path, version, wrapped_dek, ciphertext, archived_at) VALUES (?, ?, ?, ?, ?)",
                &[
                    path,
                    &current_version.to_string(),
                    &row.wrapped_dek,
                    &row.ciphertext,
                    &now().to_string(),
                ],
            )
            .await?;

        let mk = self.master_key().await?;
        let dek = egide_crypto::random::generate_key();
        let aad = aad_for(path, new_version);
        let ciphertext = egide_crypto::aead::encrypt(&*dek, new_data, Some(aad.as_bytes()))?;
        let wrapped_dek = egide_crypto::aead::encrypt(&mk, &*dek, Some(path.as_bytes()))?;

        let updated_at = now();
        self.storage
            .execute(
                "UPDATE secrets SET version = ?, wrapped_dek = ?, ciphertext = ?, updated_at = ? WHERE path = ?",
                &[
                    &new_version.to_string(),
                    &B64.encode(&wrapped_dek),
                    &B64.encode(&ciphertext),
                    &updated_at.to_string(),
                    path,
                ],
            )
            .await?;

        self.audit
            .append(AuditEvent {
                event_type: "secret.updated".to_string(),
                actor_type: "system".to_string(),
                actor_id: "secrets-engine".to_string(),
                target: Some(path.to_string()),
                access_granted: true,
                denial_reason: None,
                correlation_id: String::new(),
                event_data: json!({
                    "path": path,
                    "previous_version": current_version,
                    "new_version": new_version,
                })
                .to_string(),
            })
            .await?;

        let mut record = row.into_record()?;
        record.version = new_version;
        record.updated_at = updated_at;
        Ok(record)
    }

    /// Rolls `path` back to `target_version`'s plaintext, recorded as a
    /// fresh version under a brand-new DEK rather than resurrecting the
    /// archived ciphertext verbatim.
    pub async fn rollback(
        &self,
        path: &str,
        target_version: u32,
    ) -> Result<SecretRecord, SecretsError> {
        let current = self
            .fetch_row(path)
            .await?
            .ok_or_else(|| SecretsError::NotFound(path.to_string()))?;
        let current_version = current.version as u32;

        let mk = self.master_key().await?;

        let plaintext = if target_version == current_version {
            let wrapped_dek = B64
                .decode(&current.wrapped_dek)
                .map_err(|e| SecretsError::Storage(format!("corrupt wrapped dek: {e}")))?;
            let ciphertext = B64
                .decode(&current.ciphertext)
                .map_err(|e| SecretsError::Storage(format!("corrupt ciphertext: {e}")))?;
            self.unwrap_and_decrypt(&mk, path, target_version, &wrapped_dek, &ciphertext)
                .await?
        } else {
            let version_row: Option<VersionRow> = self
                .storage
                .query_one(
                    "SELECT version, wrapped_dek, ciphertext, archived_at FROM secret_versions WHERE path = ? AND version = ?",
                    &[path, &target_version.to_string()],
                )
                .await?;
            let version_row = version_row.ok_or(SecretsError::VersionNotFound {
                path: path.to_string(),
                version: target_version,
            })?;
            let wrapped_dek = B64
                .decode(&version_row.wrapped_dek)
                .map_err(|e| SecretsError::Storage(format!("corrupt wrapped dek: {e}")))?;
            let ciphertext = B64
                .decode(&version_row.ciphertext)
                .map_err(|e| SecretsError::Storage(format!("corrupt ciphertext: {e}")))?;
            self.unwrap_and_decrypt(&mk, path, target_version, &wrapped_dek, &ciphertext)
                .await?
        };

        let record = self.update(path, &plaintext).await?;

        self.audit
            .append(AuditEvent {
                event_type: "secret.rolled_back".to_string(),
                actor_type: "system".to_string(),
                actor_id: "secrets-engine".to_string(),
                target: Some(path.to_string()),
                access_granted: true,
                denial_reason: None,
                correlation_id: String::new(),
                event_data: json!({
                    "path": path,
                    "from_version": target_version,
                    "to_version": record.version,
                })
                .to_string(),
            })
            .await?;

        Ok(record)
    }

    /// Deletes archived versions of `path` that are neither among the
    /// newest `keep_versions` nor newer than `keep_days` days old. The
    /// live version is never touched.
    pub async fn prune_old_versions(
        &self,
        path: &str,
        keep_versions: u32,
        keep_days: i64,
    ) -> Result<PruneResult, SecretsError> {
        let versions: Vec<VersionRow> = self
            .storage
            .query_all(
                "SELECT version, wrapped_dek, ciphertext, archived_at FROM secret_versions WHERE path = ? ORDER BY version DESC",
                &[path],
            )
            .await?;

        let cutoff = now() - keep_days * 86_400;
        let mut kept = 0u32;
        let mut deleted = 0u32;

        for (idx, version_row) in versions.iter().enumerate() {
            let within_keep_count = (idx as u32) < keep_versions;
            let within_keep_days = version_row.archived_at >= cutoff;

            if within_keep_count || within_keep_days {
                kept += 1;
            } else {
                self.storage
                    .execute(
                        "DELETE FROM secret_versions WHERE path = ? AND version = ?",
                        &[path, &version_row.version.to_string()],
                    )
                    .await?;
                deleted += 1;
            }
        }

        Ok(PruneResult { deleted, kept })
    }

    /// Evaluates the requesting entity's read access via the policy engine
    /// before decrypting. Denials are audited and returned as
    /// [`SecretsError::AccessDenied`]; the plaintext is never touched.
    pub async fn get_secret_for_entity(
        &self,
        entity_id: &str,
        path: &str,
        ctx: &RequestContext,
    ) -> Result<DecryptedSecret, SecretsError> {
        let decision = self
            .policy
            .evaluate_access(entity_id, path, Operation::Read, ctx)
            .await?;

        match decision {
            Decision::Allow { .. } => self.read_decrypted(path).await,
            Decision::Deny { reason } => {
                self.audit
                    .append(AuditEvent {
                        event_type: "secret.access_denied".to_string(),
                        actor_type: "agent".to_string(),
                        actor_id: entity_id.to_string(),
                        target: Some(path.to_string()),
                        access_granted: false,
                        denial_reason: Some(reason.clone()),
                        correlation_id: String::new(),
                        event_data: json!({ "path": path }).to_string(),
                    })
                    .await?;
                Err(SecretsError::AccessDenied(reason))
            }
        }
    }

    async fn fetch_row(&self, path: &str) -> Result<Option<SecretRow>, SecretsError> {
        let row: Option<SecretRow> = self
            .storage
            .query_one(
                "SELECT path, kind, version, wrapped_dek, ciphertext, metadata, created_at, updated_at FROM secrets WHERE path = ?",
                &[path],
            )
            .await?;
        Ok(row)
    }

    async fn master_key(&self) -> Result<Vec<u8>, SecretsError> {
        Ok(self
            .seal
            .with_master_key(|mk| mk.as_bytes().to_vec())
            .await?)
    }

    /// Unwraps `wrapped_dek` under `mk` and decrypts `ciphertext` with it.
    /// Any authentication failure is treated as tamper: audited, and
    /// surfaced to the caller only as the opaque [`SecretsError::DecryptFailed`].
    async fn unwrap_and_decrypt(
        &self,
        mk: &[u8],
        path: &str,
        version: u32,
        wrapped_dek: &[u8],
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, SecretsError> {
        let result = (|| -> Result<Zeroizing<Vec<u8>>, egide_crypto::CryptoError> {
            let dek = egide_crypto::aead::decrypt(mk, wrapped_dek, Some(path.as_bytes()))?;
            let aad = aad_for(path, version);
            egide_crypto::aead::decrypt(&dek, ciphertext, Some(aad.as_bytes()))
        })();

        match result {
            Ok(plaintext) => Ok(plaintext),
            Err(_) => {
                self.audit
                    .append(AuditEvent {
                        event_type: "secret.tamper_detected".to_string(),
                        actor_type: "system".to_string(),
                        actor_id: "secrets-engine".to_string(),
                        target: Some(path.to_string()),
                        access_granted: false,
                        denial_reason: Some("decryption authentication failed".to_string()),
                        correlation_id: String::new(),
                        event_data: json!({ "path": path, "version": version }).to_string(),
                    })
                    .await?;
                Err(SecretsError::DecryptFailed)
            }
        }
    }
}

fn aad_for(path: &str, version: u32) -> String {
    format!("{path}||{version}")
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_secs() as i64
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use egide_audit::{AuditLog, AuditSigningKeySource};
    use egide_seal::{SealManager, ShamirConfig};
    use tempfile::TempDir;

    async fn setup() -> (TempDir, TempDir, TempDir, SecretStore) {
        let seal_dir = TempDir::new().unwrap();
        let audit_dir = TempDir::new().unwrap();
        let secrets_dir = TempDir::new().unwrap();

        let mut manager = SealManager::new(seal_dir.path()).await.unwrap();
        let init = manager
            .initialize(ShamirConfig {
                shares: 1,
                threshold: 1,
            })
            .await
            .unwrap();
        manager.unseal(&init.shares[0]).await.unwrap();
        let seal = SealHandle::spawn(manager);

        let audit_log = AuditLog::with_signing_key_source(
            audit_dir.path(),
            AuditSigningKeySource::Static(b"test-signing-key".to_vec()),
            None,
        )
        .await
        .unwrap();
        let audit = AuditHandle::spawn(audit_log);

        let policy = PolicyStore::open(secrets_dir.path()).await.unwrap();

        let store = SecretStore::open(secrets_dir.path(), seal, policy, audit)
            .await
            .unwrap();

        (seal_dir, audit_dir, secrets_dir, store)
    }

    #[tokio::test]
    async fn create_then_read_roundtrips() {
        let (_a, _b, _c, store) = setup().await;
        store
            .create("prod.db.password", "generic", b"hunter2", json!({}))
            .await
            .unwrap();

        let decrypted = store.read_decrypted("prod.db.password").await.unwrap();
        assert_eq!(&*decrypted.data, b"hunter2");
        assert_eq!(decrypted.record.version, 1);
    }

    #[tokio::test]
    async fn create_duplicate_path_fails() {
        let (_a, _b, _c, store) = setup().await;
        store
            .create("prod.db.password", "generic", b"hunter2", json!({}))
            .await
            .unwrap();
        let result = store
            .create("prod.db.password", "generic", b"other", json!({}))
            .await;
        assert!(matches!(result, Err(SecretsError::AlreadyExists(_))));
    }

    #[tokio::test]
    async fn update_bumps_version_and_archives_old_value() {
        let (_a, _b, _c, store) = setup().await;
        store
            .create("prod.db.password", "generic", b"v1", json!({}))
            .await
            .unwrap();
        let record = store.update("prod.db.password", b"v2").await.unwrap();
        assert_eq!(record.version, 2);

        let decrypted = store.read_decrypted("prod.db.password").await.unwrap();
        assert_eq!(&*decrypted.data, b"v2");
    }

    #[tokio::test]
    async fn rollback_restores_earlier_plaintext_as_new_version() {
        let (_a, _b, _c, store) = setup().await;
        store
            .create("prod.db.password", "generic", b"v1", json!({}))
            .await
            .unwrap();
        store.update("prod.db.password", b"v2").await.unwrap();
        store.update("prod.db.password", b"v3").await.unwrap();

        let record = store.rollback("prod.db.password", 1).await.unwrap();
        assert_eq!(record.version, 4);

        let decrypted = store.read_decrypted("prod.db.password").await.unwrap();
        assert_eq!(&*decrypted.data, b"v1");
    }

    #[tokio::test]
    async fn rollback_to_unknown_version_fails() {
        let (_a, _b, _c, store) = setup().await;
        store
            .create("prod.db.password", "generic", b"v1", json!({}))
            .await
            .unwrap();
        let result = store.rollback("prod.db.password", 99).await;
        assert!(matches!(result, Err(SecretsError::VersionNotFound { .. })));
    }

    #[tokio::test]
    async fn prune_keeps_newest_versions_and_recent_days() {
        let (_a, _b, _c, store) = setup().await;
        store
            .create("prod.db.password", "generic", b"v1", json!({}))
            .await
            .unwrap();
        for i in 2..=6 {
            store
                .update("prod.db.password", format!("v{i}").as_bytes())
                .await
                .unwrap();
        }

        // A negative `keep_days` pushes the cutoff into the future, so every
        // archived version looks "older" than it and only `keep_versions`
        // decides what survives -- avoids the test racing real wall-clock time.
        let result = store
            .prune_old_versions("prod.db.password", 2, -1)
            .await
            .unwrap();

        assert_eq!(result.kept, 2);
        assert_eq!(result.deleted, 3);
    }

    #[tokio::test]
    async fn get_secret_for_entity_denies_without_policy() {
        let (_a, _b, _c, store) = setup().await;
        store
            .create("prod.db.password", "generic", b"v1", json!({}))
            .await
            .unwrap();

        let ctx = RequestContext::at(chrono::Utc::now());
        let result = store
            .get_secret_for_entity("agent-a", "prod.db.password", &ctx)
            .await;
        assert!(matches!(result, Err(SecretsError::AccessDenied(_))));
    }

    #[tokio::test]
    async fn get_secret_for_entity_allows_with_bound_policy() {
        let (_a, _b, _c, store) = setup().await;
        store
            .create("prod.db.password", "generic", b"v1", json!({}))
            .await
            .unwrap();
        store
            .policy
            .create_policy(
                "allow-prod",
                egide_policy::PolicyDocument {
                    statements: vec![egide_policy::Statement {
                        path_pattern: "prod.**".to_string(),
                        operations: vec![Operation::Read],
                        effect: egide_policy::Effect::Allow,
                        conditions: egide_policy::Conditions::default(),
                    }],
                },
                vec!["agent-a".to_string()],
            )
            .await
            .unwrap();

        let ctx = RequestContext::at(chrono::Utc::now());
        let decrypted = store
            .get_secret_for_entity("agent-a", "prod.db.password", &ctx)
            .await
            .unwrap();
        assert_eq!(&*decrypted.data, b"v1");
    }
}

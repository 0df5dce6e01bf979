//! # Egide Audit
//!
//! Tamper-evident, append-only audit log.
//!
//! Every terminal access decision (granted or denied) is recorded as an
//! [`AuditEntry`] whose `current_hash` folds in the previous entry's hash,
//! forming a hash chain: flipping any byte of any past entry is detectable
//! by [`AuditLog::verify_chain`].
//!
//! Mutation is serialized through [`AuditHandle`], a `tokio::spawn`ed actor
//! in the same shape as `egide-seal`'s `SealHandle`, so that concurrent
//! appenders never race for the next sequence number without the retry
//! path in [`AuditLog::append`] kicking in.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod actor;
pub mod error;

use std::path::Path;

use egide_crypto::kdf;
use egide_seal::SealHandle;
use egide_storage_sqlite::SqliteBackend;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

pub use actor::{AuditCommand, AuditHandle};
pub use error::AuditError;

const GENESIS_HASH: &str = "GENESIS";
const MAX_APPEND_RETRIES: u32 = 3;

/// Context string binding the HKDF-derived audit signing key to its purpose.
const AUDIT_SIGNING_KEY_INFO: &[u8] = b"egide-audit-signing-key-v1";

/// Where the HMAC key used to sign each `current_hash` comes from.
#[derive(Debug, Clone)]
pub enum AuditSigningKeySource {
    /// Derive the signing key from the live master key via HKDF. Unavailable
    /// while sealed; entries appended while sealed are left unsigned.
    DeriveFromMk,
    /// Use a fixed, operator-supplied key regardless of seal state. Intended
    /// for emergency/sealed-acceptable audit events.
    Static(Vec<u8>),
}

/// One row of the hash-chained audit log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    /// Monotonic sequence number, starting at 1.
    pub seq: i64,
    /// Unix timestamp (seconds) when the entry was appended.
    pub timestamp: i64,
    /// Event type, e.g. `"secret.created"`, `"secret.access_denied"`.
    pub event_type: String,
    /// Kind of actor that triggered the event (e.g. `"agent"`, `"operator"`).
    pub actor_type: String,
    /// Identifier of the actor.
    pub actor_id: String,
    /// Target entity, if any (e.g. a secret path).
    pub target: Option<String>,
    /// Whether access was granted.
    pub access_granted: bool,
    /// Reason for denial, if `access_granted` is false.
    pub denial_reason: Option<String>,
    /// Caller-supplied correlation id tying related entries together.
    pub correlation_id: String,
    /// Opaque event payload, serialized as JSON text.
    pub event_data: String,
    /// Hash of the previous entry (`"GENESIS"` for `seq = 1`).
    pub prev_hash: String,
    /// `SHA-256(seq || ts || event_type || actor || target || granted || event_data || prev_hash)`.
    pub current_hash: String,
    /// Hex-encoded HMAC-SHA256 signature over `current_hash`, if signed.
    pub signature: Option<String>,
}

/// Raw row shape for `audit_logs`, mapped into [`AuditEntry`] on read.
#[derive(Debug, Clone, sqlx::FromRow)]
struct AuditRow {
    seq: i64,
    timestamp: i64,
    event_type: String,
    actor_type: String,
    actor_id: String,
    target: String,
    access_granted: i64,
    denial_reason: String,
    correlation_id: String,
    event_data: String,
    prev_hash: String,
    current_hash: String,
    signature: String,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        AuditEntry {
            seq: row.seq,
            timestamp: row.timestamp,
            event_type: row.event_type,
            actor_type: row.actor_type,
            actor_id: row.actor_id,
            target: (!row.target.is_empty()).then_some(row.target),
            access_granted: row.access_granted != 0,
            denial_reason: (!row.denial_reason.is_empty()).then_some(row.denial_reason),
            correlation_id: row.correlation_id,
            event_data: row.event_data,
            prev_hash: row.prev_hash,
            current_hash: row.current_hash,
            signature: (!row.signature.is_empty()).then_some(row.signature),
        }
    }
}

/// A new event to be appended to the audit log.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event type, e.g. `"secret.created"`.
    pub event_type: String,
    /// Kind of actor that triggered the event.
    pub actor_type: String,
    /// Identifier of the actor.
    pub actor_id: String,
    /// Target entity, if any.
    pub target: Option<String>,
    /// Whether access was granted.
    pub access_granted: bool,
    /// Reason for denial, if applicable.
    pub denial_reason: Option<String>,
    /// Correlation id. Generated if empty.
    pub correlation_id: String,
    /// Opaque event payload as a JSON string (`"{}"` if none).
    pub event_data: String,
}

/// Result of [`AuditLog::verify_chain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainVerification {
    /// Every entry in the scanned range is internally consistent.
    Valid,
    /// The chain is broken starting at `seq`.
    Broken {
        /// First sequence number that failed to verify.
        seq: i64,
        /// Human-readable reason (hash mismatch, prev_hash mismatch, gap).
        reason: String,
    },
}

/// An inclusive `[from, to]` sequence range, or unbounded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeqRange {
    /// Lower bound (inclusive), if any.
    pub from: Option<i64>,
    /// Upper bound (inclusive), if any.
    pub to: Option<i64>,
}

/// The audit log manager: owns the SQLite-backed table and the signing key
/// configuration. Callers should go through [`AuditHandle`] rather than
/// holding a `&mut AuditLog` directly, mirroring `egide-seal`'s actor split.
pub struct AuditLog {
    storage: SqliteBackend,
    signing_key_source: AuditSigningKeySource,
    seal: Option<SealHandle>,
}

impl AuditLog {
    /// Opens (creating if necessary) the audit log at `data_path`, signing
    /// entries with a key derived from the master key held by `seal`.
    pub async fn new(data_path: impl AsRef<Path>, seal: SealHandle) -> Result<Self, AuditError> {
        Self::with_signing_key_source(data_path, AuditSigningKeySource::DeriveFromMk, Some(seal))
            .await
    }

    /// Opens the audit log with an explicit signing key source. `seal` may
    /// be omitted only when `signing_key_source` is [`AuditSigningKeySource::Static`].
    pub async fn with_signing_key_source(
        data_path: impl AsRef<Path>,
        signing_key_source: AuditSigningKeySource,
        seal: Option<SealHandle>,
    ) -> Result<Self, AuditError> {
        let storage = SqliteBackend::open(data_path, "audit").await?;
        let log = Self {
            storage,
            signing_key_source,
            seal,
        };
        log.migrate().await?;
        Ok(log)
    }

    async fn migrate(&self) -> Result<(), AuditError> {
        debug!("running audit log migrations");
        self.storage
            .execute_raw(
                r#"
                CREATE TABLE IF NOT EXISTS audit_logs (
                    seq             INTEGER PRIMARY KEY,
                    timestamp       INTEGER NOT NULL,
                    event_type      TEXT NOT NULL,
                    actor_type      TEXT NOT NULL,
                    actor_id        TEXT NOT NULL,
                    target          TEXT,
                    access_granted  INTEGER NOT NULL,
                    denial_reason   TEXT,
                    correlation_id  TEXT NOT NULL,
                    event_data      TEXT NOT NULL,
                    prev_hash       TEXT NOT NULL,
                    current_hash    TEXT NOT NULL,
                    signature       TEXT
                )
                "#,
            )
            .await?;
        Ok(())
    }

    /// Appends `event`, returning the persisted entry. Retries up to
    /// [`MAX_APPEND_RETRIES`] times if another writer takes the same `seq`
    /// first, per spec's `audit_conflict` handling.
    pub async fn append(&self, event: AuditEvent) -> Result<AuditEntry, AuditError> {
        for attempt in 0..=MAX_APPEND_RETRIES {
            match self.try_append(&event).await {
                Ok(entry) => return Ok(entry),
                Err(AuditError::Storage(msg)) if is_retryable(&msg) => {
                    warn!(attempt, "audit append contended, retrying");
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(AuditError::Conflict)
    }

    async fn try_append(&self, event: &AuditEvent) -> Result<AuditEntry, AuditError> {
        let (seq_max, prev_hash) = self.tail().await?;
        let seq = seq_max + 1;
        let timestamp = now();

        let correlation_id = if event.correlation_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            event.correlation_id.clone()
        };

        let current_hash = compute_hash(
            seq,
            timestamp,
            &event.event_type,
            &event.actor_type,
            &event.actor_id,
            event.target.as_deref(),
            event.access_granted,
            &event.event_data,
            &prev_hash,
        );

        let signature = self.sign(&current_hash).await;

        let seq_str = seq.to_string();
        let ts_str = timestamp.to_string();
        let granted_str = if event.access_granted { "1" } else { "0" };

        self.storage
            .execute(
                r#"
                INSERT INTO audit_logs
                    (seq, timestamp, event_type, actor_type, actor_id, target,
                     access_granted, denial_reason, correlation_id, event_data,
                     prev_hash, current_hash, signature)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                &[
                    &seq_str,
                    &ts_str,
                    &event.event_type,
                    &event.actor_type,
                    &event.actor_id,
                    event.target.as_deref().unwrap_or(""),
                    granted_str,
                    event.denial_reason.as_deref().unwrap_or(""),
                    &correlation_id,
                    &event.event_data,
                    &prev_hash,
                    &current_hash,
                    signature.as_deref().unwrap_or(""),
                ],
            )
            .await?;

        Ok(AuditEntry {
            seq,
            timestamp,
            event_type: event.event_type.clone(),
            actor_type: event.actor_type.clone(),
            actor_id: event.actor_id.clone(),
            target: event.target.clone(),
            access_granted: event.access_granted,
            denial_reason: event.denial_reason.clone(),
            correlation_id,
            event_data: event.event_data.clone(),
            prev_hash,
            current_hash,
            signature,
        })
    }

    /// Returns `(seq_max, hash_max)`, or `(0, GENESIS)` if the log is empty.
    async fn tail(&self) -> Result<(i64, String), AuditError> {
        let row: Option<(i64, String)> = self
            .storage
            .query_one(
                "SELECT seq, current_hash FROM audit_logs ORDER BY seq DESC LIMIT 1",
                &[],
            )
            .await?;
        Ok(row.unwrap_or((0, GENESIS_HASH.to_string())))
    }

    async fn sign(&self, current_hash: &str) -> Option<String> {
        let key = match &self.signing_key_source {
            AuditSigningKeySource::Static(key) => Some(key.clone()),
            AuditSigningKeySource::DeriveFromMk => {
                let seal = self.seal.as_ref()?;
                seal.with_master_key(move |mk| mk.as_bytes().to_vec())
                    .await
                    .ok()
                    .and_then(|mk_bytes| {
                        kdf::derive_key(&mk_bytes, None, AUDIT_SIGNING_KEY_INFO, 32)
                            .ok()
                            .map(|k| k.to_vec())
                    })
            }
        }?;

        egide_crypto::sign::sign(&key, current_hash.as_bytes())
            .ok()
            .map(hex_encode)
    }

    /// Returns all entries in `range`, in `seq` order.
    pub async fn entries(&self, range: SeqRange) -> Result<Vec<AuditEntry>, AuditError> {
        let mut sql = String::from(
            "SELECT seq, timestamp, event_type, actor_type, actor_id, target, \
             access_granted, denial_reason, correlation_id, event_data, \
             prev_hash, current_hash, signature FROM audit_logs",
        );
        let mut clauses = Vec::new();
        if let Some(from) = range.from {
            clauses.push(format!("seq >= {from}"));
        }
        if let Some(to) = range.to {
            clauses.push(format!("seq <= {to}"));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY seq ASC");

        let rows: Vec<AuditRow> = self.storage.query_all(&sql, &[]).await?;
        Ok(rows.into_iter().map(AuditEntry::from).collect())
    }

    /// Walks `range` recomputing each entry's hash and checking chain
    /// linkage.
    pub async fn verify_chain(&self, range: SeqRange) -> Result<ChainVerification, AuditError> {
        let entries = self.entries(range).await?;
        let mut expected_prev = if let Some(first) = entries.first() {
            if first.seq == 1 {
                GENESIS_HASH.to_string()
            } else {
                // Caller asked for a sub-range; seed expected_prev from the
                // entry's own claim and only check internal consistency from
                // here on.
                first.prev_hash.clone()
            }
        } else {
            return Ok(ChainVerification::Valid);
        };

        let mut expected_seq = entries[0].seq;

        for entry in &entries {
            if entry.seq != expected_seq {
                return Ok(ChainVerification::Broken {
                    seq: expected_seq,
                    reason: format!("gap: expected seq {expected_seq}, found {}", entry.seq),
                });
            }

            if entry.prev_hash != expected_prev {
                return Ok(ChainVerification::Broken {
                    seq: entry.seq,
                    reason: "prev_hash does not match predecessor's current_hash".to_string(),
                });
            }

            let recomputed = compute_hash(
                entry.seq,
                entry.timestamp,
                &entry.event_type,
                &entry.actor_type,
                &entry.actor_id,
                entry.target.as_deref(),
                entry.access_granted,
                &entry.event_data,
                &entry.prev_hash,
            );

            if recomputed != entry.current_hash {
                return Ok(ChainVerification::Broken {
                    seq: entry.seq,
                    reason: "current_hash does not match recomputed hash".to_string(),
                });
            }

            expected_prev = entry.current_hash.clone();
            expected_seq += 1;
        }

        Ok(ChainVerification::Valid)
    }

    /// Exports `range` as RFC 4180 CSV text with a stable header, even when
    /// the range is empty (header-only output is intentional).
    pub async fn export_csv(&self, range: SeqRange) -> Result<String, AuditError> {
        let entries = self.entries(range).await?;
        let mut out = String::from(
            "Timestamp,Sequence,Event Type,Actor Type,Actor Id,Access Granted,Denial Reason,Correlation Id,Hash\n",
        );
        for entry in entries {
            let fields = [
                entry.timestamp.to_string(),
                entry.seq.to_string(),
                entry.event_type.clone(),
                entry.actor_type.clone(),
                entry.actor_id.clone(),
                entry.access_granted.to_string(),
                entry.denial_reason.clone().unwrap_or_default(),
                entry.correlation_id.clone(),
                entry.current_hash.clone(),
            ];
            out.push_str(
                &fields
                    .iter()
                    .map(|f| csv_quote(f))
                    .collect::<Vec<_>>()
                    .join(","),
            );
            out.push('\n');
        }
        Ok(out)
    }
}

#[allow(clippy::too_many_arguments)]
fn compute_hash(
    seq: i64,
    timestamp: i64,
    event_type: &str,
    actor_type: &str,
    actor_id: &str,
    target: Option<&str>,
    access_granted: bool,
    event_data: &str,
    prev_hash: &str,
) -> String {
    const SEP: u8 = 0x1F;
    let mut hasher = Sha256::new();
    hasher.update(seq.to_string().as_bytes());
    hasher.update([SEP]);
    hasher.update(timestamp.to_string().as_bytes());
    hasher.update([SEP]);
    hasher.update(event_type.as_bytes());
    hasher.update([SEP]);
    hasher.update(format!("{actor_type}:{actor_id}").as_bytes());
    hasher.update([SEP]);
    hasher.update(target.unwrap_or("").as_bytes());
    hasher.update([SEP]);
    hasher.update(if access_granted { b"1" } else { b"0" });
    hasher.update([SEP]);
    hasher.update(event_data.as_bytes());
    hasher.update([SEP]);
    hasher.update(prev_hash.as_bytes());
    hex_encode(hasher.finalize().to_vec())
}

fn is_retryable(msg: &str) -> bool {
    let lower = msg.to_ascii_lowercase();
    lower.contains("unique")
        || lower.contains("constraint")
        || lower.contains("locked")
        || lower.contains("busy")
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_secs() as i64
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

fn csv_quote(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

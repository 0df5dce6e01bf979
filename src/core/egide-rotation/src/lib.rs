//! # Egide Rotation
//!
//! Cron-driven credential rotation. Each enabled [`RotationSchedule`] fires
//! through a single-flight [`RotationDispatcher`] tick, which performs a
//! two-phase rotation against a registered [`RotationTarget`]: commit a new
//! credential, then revoke the old one. A revoke failure rolls the commit
//! back and records `rolled_back`, leaving the old credential intact.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cron::Schedule as CronSchedule;
use dashmap::DashMap;
use egide_audit::{AuditEvent, AuditHandle};
use egide_storage_sqlite::SqliteBackend;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

pub use error::RotationError;

/// Outcome of committing a new credential, handed back to `revoke_old_credential`
/// and `rollback_commit` so the target can identify what it just created.
#[derive(Debug, Clone)]
pub struct RotationCommit {
    /// Opaque identifier the target uses to find what it committed, e.g. a
    /// new secret version number encoded as a string.
    pub commit_ref: String,
}

/// A rotatable resource. Implementations own the actual credential-rotation
/// logic (e.g. writing a new secret version, minting a new database
/// password); the dispatcher only sequences commit/revoke/rollback and
/// records history.
#[async_trait]
pub trait RotationTarget: Send + Sync {
    /// Creates and persists a new credential, without touching the old one.
    async fn commit_new_credential(
        &self,
        schedule: &RotationSchedule,
    ) -> Result<RotationCommit, RotationError>;

    /// Revokes the credential that was live before `commit` took effect.
    async fn revoke_old_credential(
        &self,
        schedule: &RotationSchedule,
        commit: &RotationCommit,
    ) -> Result<(), RotationError>;

    /// Undoes `commit`. Called when `revoke_old_credential` fails, so the
    /// old credential is left as the sole live one.
    async fn rollback_commit(
        &self,
        schedule: &RotationSchedule,
        commit: &RotationCommit,
    ) -> Result<(), RotationError>;
}

/// A cron-scheduled rotation target.
#[derive(Debug, Clone)]
pub struct RotationSchedule {
    /// Unique schedule id.
    pub id: String,
    /// Which registered [`RotationTarget`] handles this schedule.
    pub target_kind: String,
    /// Target-specific reference, e.g. a secret path.
    pub target_ref: String,
    /// Standard cron expression (seconds-field form, per the `cron` crate).
    pub cron_expression: String,
    /// Whether the dispatcher considers this schedule for firing.
    pub enabled: bool,
    /// Unix timestamp (seconds) of the last fire, if any.
    pub last_at: Option<i64>,
    /// Unix timestamp (seconds) of the next scheduled fire.
    pub next_at: i64,
}

/// Status of one [`RotationHistory`] entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationStatus {
    /// Recorded but not yet started.
    Pending,
    /// Commit phase is running.
    InProgress,
    /// Commit and revoke both succeeded.
    Success,
    /// Commit failed; nothing changed.
    Failed,
    /// Commit succeeded but revoke failed and was rolled back.
    RolledBack,
}

impl RotationStatus {
    fn as_str(self) -> &'static str {
        match self {
            RotationStatus::Pending => "pending",
            RotationStatus::InProgress => "in_progress",
            RotationStatus::Success => "success",
            RotationStatus::Failed => "failed",
            RotationStatus::RolledBack => "rolled_back",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "in_progress" => RotationStatus::InProgress,
            "success" => RotationStatus::Success,
            "failed" => RotationStatus::Failed,
            "rolled_back" => RotationStatus::RolledBack,
            _ => RotationStatus::Pending,
        }
    }
}

/// One record of a rotation attempt.
#[derive(Debug, Clone)]
pub struct RotationHistory {
    /// Unique history row id.
    pub id: String,
    /// Schedule this attempt belongs to.
    pub schedule_id: String,
    /// Unix timestamp (seconds) the attempt started.
    pub started_at: i64,
    /// Unix timestamp (seconds) the attempt finished, if it has.
    pub completed_at: Option<i64>,
    /// Current status.
    pub status: RotationStatus,
    /// Version/ref superseded by this rotation, if known.
    pub old_version: Option<String>,
    /// Version/ref produced by this rotation, if known.
    pub new_version: Option<String>,
    /// Wall-clock duration of the attempt, once completed.
    pub duration_ms: Option<i64>,
    /// Error message, if the attempt failed or was rolled back.
    pub error: Option<String>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct ScheduleRow {
    id: String,
    target_kind: String,
    target_ref: String,
    cron_expression: String,
    enabled: i64,
    last_at: Option<i64>,
    next_at: i64,
}

impl From<ScheduleRow> for RotationSchedule {
    fn from(row: ScheduleRow) -> Self {
        RotationSchedule {
            id: row.id,
            target_kind: row.target_kind,
            target_ref: row.target_ref,
            cron_expression: row.cron_expression,
            enabled: row.enabled != 0,
            last_at: row.last_at,
            next_at: row.next_at,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct HistoryRow {
    id: String,
    schedule_id: String,
    started_at: i64,
    completed_at: Option<i64>,
    status: String,
    old_version: Option<String>,
    new_version: Option<String>,
    duration_ms: Option<i64>,
    error: Option<String>,
}

impl From<HistoryRow> for RotationHistory {
    fn from(row: HistoryRow) -> Self {
        RotationHistory {
            id: row.id,
            schedule_id: row.schedule_id,
            started_at: row.started_at,
            completed_at: row.completed_at,
            status: RotationStatus::parse(&row.status),
            old_version: row.old_version,
            new_version: row.new_version,
            duration_ms: row.duration_ms,
            error: row.error,
        }
    }
}

/// Owns the schedule/history tables and registered [`RotationTarget`]s.
/// Dispatch ticks are serialized through an internal lock so two concurrent
/// callers never fire the same due schedule twice.
pub struct RotationDispatcher {
    storage: SqliteBackend,
    audit: AuditHandle,
    targets: DashMap<String, Arc<dyn RotationTarget>>,
    dispatch_lock: Mutex<()>,
}

impl RotationDispatcher {
    /// Opens (creating if necessary) the rotation store at `data_path`.
    pub async fn open(data_path: impl AsRef<Path>, audit: AuditHandle) -> Result<Self, RotationError> {
        let storage = SqliteBackend::open(data_path, "rotation").await?;
        let dispatcher = Self {
            storage,
            audit,
            targets: DashMap::new(),
            dispatch_lock: Mutex::new(()),
        };
        dispatcher.migrate().await?;
        Ok(dispatcher)
    }

    async fn migrate(&self) -> Result<(), RotationError> {
        self.storage
            .execute_raw(
                r#"
                CREATE TABLE IF NOT EXISTS rotation_schedules (
                    id              TEXT PRIMARY KEY,
                    target_kind     TEXT NOT NULL,
                    target_ref      TEXT NOT NULL,
                    cron_expression TEXT NOT NULL,
                    enabled         INTEGER NOT NULL,
                    last_at         INTEGER,
                    next_at         INTEGER NOT NULL
                )
                "#,
            )
            .await?;
        self.storage
            .execute_raw(
                r#"
                CREATE TABLE IF NOT EXISTS rotation_history (
                    id            TEXT PRIMARY KEY,
                    schedule_id   TEXT NOT NULL,
                    started_at    INTEGER NOT NULL,
                    completed_at  INTEGER,
                    status        TEXT NOT NULL,
                    old_version   TEXT,
                    new_version   TEXT,
                    duration_ms   INTEGER,
                    error         TEXT
                )
                "#,
            )
            .await?;
        Ok(())
    }

    /// Registers the target driver responsible for `target_kind`.
    pub fn register_target(&self, target_kind: &str, target: Arc<dyn RotationTarget>) {
        self.targets.insert(target_kind.to_string(), target);
    }

    /// Creates a new enabled schedule, computing its first `next_at` from
    /// `cron_expression` relative to now.
    pub async fn create_schedule(
        &self,
        target_kind: &str,
        target_ref: &str,
        cron_expression: &str,
    ) -> Result<RotationSchedule, RotationError> {
        let next_at = next_fire_after(cron_expression, Utc::now())?;
        let id = uuid::Uuid::new_v4().to_string();

        self.storage
            .execute(
                "INSERT INTO rotation_schedules (id, target_kind, target_ref, cron_expression, enabled, last_at, next_at) VALUES (?, ?, ?, ?, 1, NULL, ?)",
                &[
                    &id,
                    target_kind,
                    target_ref,
                    cron_expression,
                    &next_at.timestamp().to_string(),
                ],
            )
            .await?;

        Ok(RotationSchedule {
            id,
            target_kind: target_kind.to_string(),
            target_ref: target_ref.to_string(),
            cron_expression: cron_expression.to_string(),
            enabled: true,
            last_at: None,
            next_at: next_at.timestamp(),
        })
    }

    /// Fetches a schedule by id.
    pub async fn get_schedule(&self, id: &str) -> Result<RotationSchedule, RotationError> {
        self.fetch_schedule_row(id)
            .await?
            .map(RotationSchedule::from)
            .ok_or_else(|| RotationError::NotFound(id.to_string()))
    }

    /// Returns every history row recorded for `schedule_id`, most recent
    /// first.
    pub async fn history_for(&self, schedule_id: &str) -> Result<Vec<RotationHistory>, RotationError> {
        let rows: Vec<HistoryRow> = self
            .storage
            .query_all(
                "SELECT id, schedule_id, started_at, completed_at, status, old_version, new_version, duration_ms, error \
                 FROM rotation_history WHERE schedule_id = ? ORDER BY started_at DESC",
                &[schedule_id],
            )
            .await?;
        Ok(rows.into_iter().map(RotationHistory::from).collect())
    }

    /// Fires every enabled schedule whose `next_at` has passed. Single-flight:
    /// if a tick is already in progress, this call waits for it rather than
    /// running a second pass concurrently, then returns `0` since the prior
    /// tick already covered whatever was due.
    pub async fn dispatch_due(&self) -> Result<usize, RotationError> {
        let Ok(_guard) = self.dispatch_lock.try_lock() else {
            return Ok(0);
        };

        let now = Utc::now();
        let rows: Vec<ScheduleRow> = self
            .storage
            .query_all(
                "SELECT id, target_kind, target_ref, cron_expression, enabled, last_at, next_at \
                 FROM rotation_schedules WHERE enabled = 1 AND next_at <= ?",
                &[&now.timestamp().to_string()],
            )
            .await?;

        let mut fired = 0usize;
        for row in rows {
            let schedule = RotationSchedule::from(row);
            if let Err(e) = self.rotate(&schedule).await {
                warn!(schedule_id = %schedule.id, error = %e, "rotation attempt errored");
            }
            fired += 1;
        }

        Ok(fired)
    }

    /// Runs one rotation attempt for `schedule` regardless of whether it is
    /// due, recording a [`RotationHistory`] row and advancing `next_at`.
    pub async fn rotate(&self, schedule: &RotationSchedule) -> Result<RotationHistory, RotationError> {
        let target = self
            .targets
            .get(&schedule.target_kind)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| RotationError::UnknownTarget(schedule.target_kind.clone()))?;

        let history_id = uuid::Uuid::new_v4().to_string();
        let started_at = now();
        self.insert_history(&history_id, &schedule.id, started_at, RotationStatus::InProgress)
            .await?;

        let commit_result = target.commit_new_credential(schedule).await;

        let history = match commit_result {
            Err(e) => {
                self.finish_history(&history_id, RotationStatus::Failed, None, None, Some(e.to_string()))
                    .await?;
                self.audit_rotation(schedule, "rotation.failed", false, Some(e.to_string()))
                    .await?;
                self.fetch_history(&history_id).await?
            }
            Ok(commit) => match target.revoke_old_credential(schedule, &commit).await {
                Ok(()) => {
                    self.finish_history(
                        &history_id,
                        RotationStatus::Success,
                        None,
                        Some(commit.commit_ref.clone()),
                        None,
                    )
                    .await?;
                    self.audit_rotation(schedule, "rotation.success", true, None).await?;
                    info!(schedule_id = %schedule.id, "rotation succeeded");
                    self.fetch_history(&history_id).await?
                }
                Err(e) => {
                    if let Err(rollback_err) = target.rollback_commit(schedule, &commit).await {
                        warn!(
                            schedule_id = %schedule.id,
                            error = %rollback_err,
                            "rollback of rotation commit also failed"
                        );
                    }
                    self.finish_history(
                        &history_id,
                        RotationStatus::RolledBack,
                        None,
                        Some(commit.commit_ref.clone()),
                        Some(e.to_string()),
                    )
                    .await?;
                    self.audit_rotation(schedule, "rotation.rolled_back", false, Some(e.to_string()))
                        .await?;
                    self.fetch_history(&history_id).await?
                }
            },
        };

        let next_at = next_fire_after(&schedule.cron_expression, Utc::now())?;
        self.storage
            .execute(
                "UPDATE rotation_schedules SET last_at = ?, next_at = ? WHERE id = ?",
                &[
                    &started_at.to_string(),
                    &next_at.timestamp().to_string(),
                    &schedule.id,
                ],
            )
            .await?;

        Ok(history)
    }

    async fn insert_history(
        &self,
        id: &str,
        schedule_id: &str,
        started_at: i64,
        status: RotationStatus,
    ) -> Result<(), RotationError> {
        self.storage
            .execute(
                "INSERT INTO rotation_history (id, schedule_id, started_at, completed_at, status, old_version, new_version, duration_ms, error) \
                 VALUES (?, ?, ?, NULL, ?, NULL, NULL, NULL, NULL)",
                &[id, schedule_id, &started_at.to_string(), status.as_str()],
            )
            .await?;
        Ok(())
    }

    async fn finish_history(
        &self,
        id: &str,
        status: RotationStatus,
        old_version: Option<String>,
        new_version: Option<String>,
        error: Option<String>,
    ) -> Result<(), RotationError> {
        let completed_at = now();
        let started_at: Option<(i64,)> = self
            .storage
            .query_one("SELECT started_at FROM rotation_history WHERE id = ?", &[id])
            .await?;
        let duration_ms = started_at
            .map(|(s,)| (completed_at - s) * 1000)
            .unwrap_or_default();

        self.storage
            .execute(
                "UPDATE rotation_history SET completed_at = ?, status = ?, old_version = ?, new_version = ?, duration_ms = ?, error = ? WHERE id = ?",
                &[
                    &completed_at.to_string(),
                    status.as_str(),
                    old_version.as_deref().unwrap_or(""),
                    new_version.as_deref().unwrap_or(""),
                    &duration_ms.to_string(),
                    error.as_deref().unwrap_or(""),
                    id,
                ],
            )
            .await?;
        Ok(())
    }

    async fn fetch_history(&self, id: &str) -> Result<RotationHistory, RotationError> {
        let row: Option<HistoryRow> = self
            .storage
            .query_one(
                "SELECT id, schedule_id, started_at, completed_at, status, old_version, new_version, duration_ms, error \
                 FROM rotation_history WHERE id = ?",
                &[id],
            )
            .await?;
        row.map(RotationHistory::from)
            .ok_or_else(|| RotationError::NotFound(id.to_string()))
    }

    async fn fetch_schedule_row(&self, id: &str) -> Result<Option<ScheduleRow>, RotationError> {
        let row: Option<ScheduleRow> = self
            .storage
            .query_one(
                "SELECT id, target_kind, target_ref, cron_expression, enabled, last_at, next_at \
                 FROM rotation_schedules WHERE id = ?",
                &[id],
            )
            .await?;
        Ok(row)
    }

    async fn audit_rotation(
        &self,
        schedule: &RotationSchedule,
        event_type: &str,
        access_granted: bool,
        error: Option<String>,
    ) -> Result<(), RotationError> {
        self.audit
            .append(AuditEvent {
                event_type: event_type.to_string(),
                actor_type: "system".to_string(),
                actor_id: "rotation-dispatcher".to_string(),
                target: Some(schedule.target_ref.clone()),
                access_granted,
                denial_reason: error.clone(),
                correlation_id: String::new(),
                event_data: json!({
                    "schedule_id": schedule.id,
                    "target_kind": schedule.target_kind,
                    "error": error,
                })
                .to_string(),
            })
            .await?;
        Ok(())
    }
}

fn next_fire_after(cron_expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, RotationError> {
    let schedule = CronSchedule::from_str(cron_expression)
        .map_err(|e| RotationError::InvalidCron(e.to_string()))?;
    schedule
        .after(&after)
        .next()
        .ok_or_else(|| RotationError::InvalidCron("cron expression has no future occurrences".to_string()))
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_secs() as i64
}

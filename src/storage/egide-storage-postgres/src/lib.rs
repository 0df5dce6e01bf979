//! # Egide Storage - PostgreSQL Backend
//!
//! PostgreSQL implementation of the storage backend with tenant isolation.
//! Unlike [`egide-storage-sqlite`](https://docs.rs/egide-storage-sqlite), which
//! isolates tenants with one database file each, every tenant here gets its
//! own schema within a single database, created on first use.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info};

use egide_storage::{StorageBackend, StorageError};

/// PostgreSQL storage backend with tenant isolation via per-tenant schemas.
#[derive(Clone)]
pub struct PostgresBackend {
    pool: PgPool,
    actor: Option<String>,
}

impl PostgresBackend {
    /// Connects to `database_url` and prepares (creating if necessary) the
    /// schema for `tenant`.
    ///
    /// # Arguments
    ///
    /// * `database_url` - Postgres connection string, without a search path.
    /// * `tenant` - Tenant identifier (must match `[a-z0-9_-]+`), used as the
    ///   schema name.
    pub async fn open(database_url: &str, tenant: &str) -> Result<Self, StorageError> {
        Self::validate_tenant(tenant)?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!(tenant = %tenant, "creating tenant schema if absent");
        sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS \"{tenant}\""))
            .execute(&pool)
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("failed to create schema: {e}")))?;

        // Subsequent connections on this pool default to the tenant's schema.
        sqlx::query(&format!("SET search_path TO \"{tenant}\""))
            .execute(&pool)
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("failed to set search_path: {e}")))?;

        let backend = Self { pool, actor: None };
        backend.migrate().await?;

        info!(tenant = %tenant, "PostgreSQL backend ready");

        Ok(backend)
    }

    /// Sets the actor for audit logging. See [`egide_storage_sqlite::SqliteBackend::with_actor`].
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    fn validate_tenant(tenant: &str) -> Result<(), StorageError> {
        if tenant.is_empty() {
            return Err(StorageError::InvalidInput("tenant cannot be empty".into()));
        }
        if tenant.len() > 64 {
            return Err(StorageError::InvalidInput("tenant name too long".into()));
        }
        let valid = tenant
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');
        if !valid {
            return Err(StorageError::InvalidInput(
                "tenant must match [a-z0-9_-]+".into(),
            ));
        }
        Ok(())
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        debug!("running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key        TEXT PRIMARY KEY,
                value      BYTEA NOT NULL,
                version    BIGINT NOT NULL DEFAULT 1,
                created_at BIGINT NOT NULL,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_history (
                id         BIGSERIAL PRIMARY KEY,
                key        TEXT NOT NULL,
                value      BYTEA,
                version    BIGINT NOT NULL,
                operation  TEXT NOT NULL,
                actor      TEXT,
                timestamp  BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_key ON kv_history (key)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_history_timestamp ON kv_history (timestamp)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;

        debug!("migrations complete");
        Ok(())
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before UNIX epoch")
            .as_secs() as i64
    }

    /// Returns the current actor, if set.
    pub fn current_actor(&self) -> Option<String> {
        self.actor.clone()
    }

    /// Executes raw SQL statements (for migrations/schema creation).
    pub async fn execute_raw(&self, sql: &str) -> Result<(), StorageError> {
        for statement in sql.split(';').filter(|s| !s.trim().is_empty()) {
            sqlx::query(statement.trim())
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }
        Ok(())
    }

    /// Executes a SQL statement with `$1`-style parameters.
    pub async fn execute(&self, sql: &str, params: &[&str]) -> Result<(), StorageError> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = query.bind(*param);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(())
    }

    /// Queries a single row with typed results.
    pub async fn query_one<T>(&self, sql: &str, params: &[&str]) -> Result<Option<T>, StorageError>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        let mut query = sqlx::query_as::<_, T>(sql);
        for param in params {
            query = query.bind(*param);
        }
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))
    }

    /// Queries multiple rows with typed results.
    pub async fn query_all<T>(&self, sql: &str, params: &[&str]) -> Result<Vec<T>, StorageError>
    where
        T: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> + Send + Unpin,
    {
        let mut query = sqlx::query_as::<_, T>(sql);
        for param in params {
            query = query.bind(*param);
        }
        query
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(row.map(|(v,)| v))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let now = Self::now();

        let existing: Option<(i64,)> = sqlx::query_as("SELECT version FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        let (version, operation) = match existing {
            Some((v,)) => (v + 1, "update"),
            None => (1, "create"),
        };

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (key) DO UPDATE SET
                value = excluded.value,
                version = excluded.version,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(version)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        sqlx::query(
            "INSERT INTO kv_history (key, value, version, operation, actor, timestamp) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(key)
        .bind(value)
        .bind(version)
        .bind(operation)
        .bind(self.actor.as_deref())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let existing: Option<(i64,)> = sqlx::query_as("SELECT version FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        if let Some((version,)) = existing {
            let now = Self::now();

            sqlx::query("DELETE FROM kv_store WHERE key = $1")
                .bind(key)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

            sqlx::query(
                "INSERT INTO kv_history (key, value, version, operation, actor, timestamp) VALUES ($1, NULL, $2, 'delete', $3, $4)",
            )
            .bind(key)
            .bind(version + 1)
            .bind(self.actor.as_deref())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        }

        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let pattern = format!("{prefix}%");
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM kv_store WHERE key LIKE $1")
            .bind(&pattern)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }
}

/// Tests require a reachable PostgreSQL instance at `EGIDE_TEST_POSTGRES_URL`
/// and are skipped otherwise, since this crate has no embedded-database
/// equivalent to `egide-storage-sqlite`'s file-backed tests.
#[cfg(test)]
mod tests {
    use super::*;

    async fn setup(tenant: &str) -> Option<PostgresBackend> {
        let url = std::env::var("EGIDE_TEST_POSTGRES_URL").ok()?;
        Some(PostgresBackend::open(&url, tenant).await.unwrap())
    }

    #[tokio::test]
    async fn test_crud_roundtrip() {
        let Some(backend) = setup("test_crud_roundtrip").await else {
            eprintln!("skipping: EGIDE_TEST_POSTGRES_URL not set");
            return;
        };

        assert!(backend.get("secret/key").await.unwrap().is_none());

        backend.put("secret/key", b"secret-value").await.unwrap();
        assert_eq!(
            backend.get("secret/key").await.unwrap(),
            Some(b"secret-value".to_vec())
        );

        backend.put("secret/key", b"new-value").await.unwrap();
        assert_eq!(
            backend.get("secret/key").await.unwrap(),
            Some(b"new-value".to_vec())
        );

        backend.delete("secret/key").await.unwrap();
        assert!(backend.get("secret/key").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_tenant_schemas_are_isolated() {
        let Some(backend_a) = setup("test_tenant_a").await else {
            eprintln!("skipping: EGIDE_TEST_POSTGRES_URL not set");
            return;
        };
        let backend_b = setup("test_tenant_b").await.unwrap();

        backend_a.put("shared-key", b"value-a").await.unwrap();
        backend_b.put("shared-key", b"value-b").await.unwrap();

        assert_eq!(
            backend_a.get("shared-key").await.unwrap(),
            Some(b"value-a".to_vec())
        );
        assert_eq!(
            backend_b.get("shared-key").await.unwrap(),
            Some(b"value-b".to_vec())
        );
    }

    #[tokio::test]
    async fn test_tenant_validation_invalid_chars() {
        let Ok(url) = std::env::var("EGIDE_TEST_POSTGRES_URL") else {
            eprintln!("skipping: EGIDE_TEST_POSTGRES_URL not set");
            return;
        };
        let result = PostgresBackend::open(&url, "Invalid Tenant").await;
        assert!(matches!(result, Err(StorageError::InvalidInput(_))));
    }
}

//! SQLite storage backend for pairing edges.

use super::PairingStore;
use crate::error::{LinkError, StorageError};
use async_trait::async_trait;
use link_types::PrincipalId;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-based pairing edge storage.
///
/// Uses WAL mode for concurrent reads/writes. A device has at most one
/// owner, enforced by a UNIQUE constraint on `device_id`.
#[derive(Clone, Debug)]
pub struct SqlitePairingStore {
    pool: SqlitePool,
}

impl SqlitePairingStore {
    /// Open (or create) the database at `path` and run migrations.
    pub async fn new(path: &Path) -> Result<Self, StorageError> {
        if path.as_os_str().is_empty() {
            return Err(StorageError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(StorageError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        // A single connection: every pooled connection would get its own
        // private in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS device_pairs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL,
                device_id INTEGER NOT NULL UNIQUE,
                created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_device_pairs_user ON device_pairs(user_id)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        Ok(())
    }
}

fn to_sql(id: PrincipalId) -> i64 {
    id.value() as i64
}

fn from_sql(raw: i64) -> PrincipalId {
    PrincipalId::new(raw as u64)
}

#[async_trait]
impl PairingStore for SqlitePairingStore {
    async fn create_edge(&self, user: PrincipalId, device: PrincipalId) -> Result<(), LinkError> {
        let result = sqlx::query(
            r#"
            INSERT INTO device_pairs (user_id, device_id)
            VALUES (?1, ?2)
            ON CONFLICT(device_id) DO NOTHING
            "#,
        )
        .bind(to_sql(user))
        .bind(to_sql(device))
        .execute(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        if result.rows_affected() == 0 {
            return Err(LinkError::AlreadyPaired { device });
        }

        tracing::debug!("Stored pairing edge: user={} device={}", user, device);
        Ok(())
    }

    async fn remove_edge(&self, device: PrincipalId) -> Result<bool, LinkError> {
        let result = sqlx::query("DELETE FROM device_pairs WHERE device_id = ?1")
            .bind(to_sql(device))
            .execute(&self.pool)
            .await
            .map_err(StorageError::Database)?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_owner(&self, device: PrincipalId) -> Result<Option<PrincipalId>, LinkError> {
        let owner: Option<i64> =
            sqlx::query_scalar("SELECT user_id FROM device_pairs WHERE device_id = ?1")
                .bind(to_sql(device))
                .fetch_optional(&self.pool)
                .await
                .map_err(StorageError::Database)?;

        Ok(owner.map(from_sql))
    }

    async fn find_devices(&self, user: PrincipalId) -> Result<Vec<PrincipalId>, LinkError> {
        let devices: Vec<i64> = sqlx::query_scalar(
            "SELECT device_id FROM device_pairs WHERE user_id = ?1 ORDER BY id ASC",
        )
        .bind(to_sql(user))
        .fetch_all(&self.pool)
        .await
        .map_err(StorageError::Database)?;

        Ok(devices.into_iter().map(from_sql).collect())
    }
}

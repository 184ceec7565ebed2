//! Snapshot history store
//!
//! One serialized staking snapshot per UTC calendar date, written every
//! refresh cycle and read back for the trailing APR windows. Writes for a
//! date that already exists overwrite it; entries are never expired.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tokio::time::timeout;

/// Key→bytes history store boundary
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Fetch a snapshot; `None` means not found, `Err` a transport failure
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a snapshot, overwriting any existing entry for the key
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;
}

/// SQLite-backed snapshot store
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
    op_deadline: Duration,
}

impl SqliteSnapshotStore {
    /// Open or create the snapshot database
    pub async fn open(path: &Path, op_deadline: Duration) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        // sqlx will not create the database file on its own
        if !path.exists() {
            std::fs::File::create(path)?;
        }

        let url = format!("sqlite:{}", path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .context("Failed to open snapshot database")?;

        // WAL mode and a busy timeout prevent SQLITE_BUSY errors when another
        // process has the database open
        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        sqlx::query("PRAGMA busy_timeout=5000").execute(&pool).await?;

        let store = Self { pool, op_deadline };
        store.init_schema().await?;

        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "
            CREATE TABLE IF NOT EXISTS snapshots (
                date_key TEXT PRIMARY KEY,
                payload BLOB NOT NULL,
                stored_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = timeout(
            self.op_deadline,
            sqlx::query_as::<_, (Vec<u8>,)>("SELECT payload FROM snapshots WHERE date_key = ?")
                .bind(key)
                .fetch_optional(&self.pool),
        )
        .await
        .context("snapshot read timed out")?
        .context("snapshot read failed")?;

        Ok(row.map(|(payload,)| payload))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        timeout(
            self.op_deadline,
            sqlx::query(
                "INSERT INTO snapshots (date_key, payload, stored_at)
                 VALUES (?, ?, datetime('now'))
                 ON CONFLICT(date_key) DO UPDATE SET
                     payload = excluded.payload,
                     stored_at = excluded.stored_at",
            )
            .bind(key)
            .bind(value)
            .execute(&self.pool),
        )
        .await
        .context("snapshot write timed out")?
        .context("snapshot write failed")?;

        Ok(())
    }
}

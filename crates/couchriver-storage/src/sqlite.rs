//! SQLite storage backend for couchriver.
//!
//! Persists one checkpoint row per river to a single SQLite file.
//! Uses `sqlx` with WAL mode so tooling can read while a river writes.
//!
//! # Usage
//! ```rust,no_run
//! use couchriver_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./rivers.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use couchriver_core::{CheckpointStore, RiverError};

use crate::memory::CheckpointRecord;

/// SQLite-backed checkpoint storage.
pub struct SqliteStorage {
    pool: SqlitePool,
}

fn storage_err(e: sqlx::Error) -> RiverError {
    RiverError::Storage(e.to_string())
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./rivers.db"`) or a full
    /// SQLite URL (`"sqlite:./rivers.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, RiverError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped.
    pub async fn in_memory() -> Result<Self, RiverError> {
        // Each connection would get its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;
        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<(), RiverError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                river      TEXT    NOT NULL PRIMARY KEY,
                last_seq   TEXT    NOT NULL,
                writes     INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Full record for `key`.
    pub async fn record(&self, key: &str) -> Result<Option<CheckpointRecord>, RiverError> {
        let row = sqlx::query(
            "SELECT river, last_seq, writes, updated_at FROM checkpoints WHERE river = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.map(|r| CheckpointRecord {
            key: r.get("river"),
            last_seq: r.get("last_seq"),
            writes: r.get::<i64, _>("writes") as u64,
            updated_at: DateTime::<Utc>::from_timestamp_millis(r.get("updated_at"))
                .unwrap_or_default(),
        }))
    }
}

#[async_trait]
impl CheckpointStore for SqliteStorage {
    async fn get(&self, key: &str) -> Result<Option<String>, RiverError> {
        let row = sqlx::query("SELECT last_seq FROM checkpoints WHERE river = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row.map(|r| r.get::<String, _>("last_seq")))
    }

    async fn set(&self, key: &str, token: &str) -> Result<(), RiverError> {
        sqlx::query(
            "INSERT INTO checkpoints (river, last_seq, writes, updated_at)
             VALUES (?, ?, 1, ?)
             ON CONFLICT (river) DO UPDATE SET
                last_seq   = excluded.last_seq,
                writes     = checkpoints.writes + 1,
                updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(token)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(river = key, last_seq = token, "checkpoint saved");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RiverError> {
        sqlx::query("DELETE FROM checkpoints WHERE river = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }
}

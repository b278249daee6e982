// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQLite-backed durable action queue.
//!
//! Actions are stored as JSON text, one row per action, ordered by an
//! auto-increment id:
//!
//! ```sql
//! CREATE TABLE contentSharingAction (
//!   id INTEGER PRIMARY KEY AUTOINCREMENT,
//!   action TEXT NOT NULL
//! )
//! ```
//!
//! `AUTOINCREMENT` guarantees ids are never reused, so FIFO order holds even
//! after the queue was emptied. Rows survive restarts; whatever was pending
//! when the process died is replayed on the next drain.

use async_trait::async_trait;
use sqlx::{any::AnyPoolOptions, AnyPool, Row};
use std::path::Path;
use std::sync::Once;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::traits::{ActionQueueStore, StorageError};
use super::ACTION_QUEUE;
use crate::action::{Action, QueueEntry};
use crate::resilience::retry::{retry, RetryConfig};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

pub struct SqliteActionQueue {
    pool: AnyPool,
    path: String,
}

impl SqliteActionQueue {
    /// Open (or create) the queue database at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_string_lossy().to_string();
        Self::connect(&format!("sqlite://{path}?mode=rwc"), path).await
    }

    /// Open a private in-memory queue. Nothing survives the process.
    pub async fn in_memory() -> Result<Self, StorageError> {
        Self::connect("sqlite::memory:", ":memory:".to_string()).await
    }

    async fn connect(url: &str, path: String) -> Result<Self, StorageError> {
        install_drivers();

        // An in-memory SQLite database lives in a single connection
        let pool = retry("queue_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(1)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let queue = Self { pool, path };
        if queue.path != ":memory:" {
            queue.enable_wal_mode().await?;
        }
        queue.init_schema().await?;

        let pending = queue.len().await?;
        if pending > 0 {
            warn!(pending, path = %queue.path, "Action queue has entries from previous run, will replay");
        } else {
            info!(path = %queue.path, "Action queue opened");
        }

        Ok(queue)
    }

    async fn enable_wal_mode(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to enable WAL mode: {e}")))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Failed to set synchronous mode: {e}")))?;

        Ok(())
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {ACTION_QUEUE} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                action TEXT NOT NULL
            )"
        );

        retry("queue_init_schema", &RetryConfig::startup(), || async {
            sqlx::query(&sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }

    /// Path of the backing file (`:memory:` for in-memory queues)
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Reclaim WAL file space once the queue is empty.
    pub async fn checkpoint(&self) -> Result<(), StorageError> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(format!("Queue checkpoint failed: {e}")))?;

        debug!(path = %self.path, "Queue checkpoint completed");
        Ok(())
    }
}

#[async_trait]
impl ActionQueueStore for SqliteActionQueue {
    async fn enqueue(&self, action: &Action) -> Result<i64, StorageError> {
        let json = serde_json::to_string(action)
            .map_err(|e| StorageError::Backend(format!("Failed to serialize action: {e}")))?;
        let sql = format!("INSERT INTO {ACTION_QUEUE} (action) VALUES (?) RETURNING id");

        // Only the connection is retried: a replayed INSERT could queue the
        // action twice
        let mut conn = retry("queue_acquire", &RetryConfig::query(), || async {
            self.pool
                .acquire()
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;
        let row = sqlx::query(&sql)
            .bind(&json)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let id = row
            .try_get::<i64, _>("id")
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        debug!(id, kind = action.kind(), "Action queued");
        Ok(id)
    }

    async fn peek_oldest(&self) -> Result<Option<QueueEntry>, StorageError> {
        let sql = format!("SELECT id, action FROM {ACTION_QUEUE} ORDER BY id ASC LIMIT 1");

        let row = retry("queue_peek", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: i64 = row
            .try_get("id")
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        // Any driver may surface TEXT as bytes
        let json: String = row
            .try_get::<String, _>("action")
            .ok()
            .or_else(|| {
                row.try_get::<Vec<u8>, _>("action")
                    .ok()
                    .and_then(|bytes| String::from_utf8(bytes).ok())
            })
            .ok_or_else(|| StorageError::Backend(format!("queue row {id} has no action")))?;

        let action: Action = serde_json::from_str(&json)
            .map_err(|e| StorageError::Backend(format!("queue row {id} is not a valid action: {e}")))?;

        Ok(Some(QueueEntry { id, action }))
    }

    async fn remove(&self, id: i64) -> Result<(), StorageError> {
        let sql = format!("DELETE FROM {ACTION_QUEUE} WHERE id = ?");

        retry("queue_remove", &RetryConfig::query(), || async {
            sqlx::query(&sql)
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| StorageError::Backend(e.to_string()))
        })
        .await?;

        Ok(())
    }

    async fn len(&self) -> Result<u64, StorageError> {
        let sql = format!("SELECT COUNT(*) as cnt FROM {ACTION_QUEUE}");

        let row = sqlx::query(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let count: i64 = row
            .try_get("cnt")
            .map_err(|e| StorageError::Backend(e.to_string()))?;

        Ok(count.max(0) as u64)
    }
}

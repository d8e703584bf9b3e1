use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::sync::RwLock;
use tracing::info;

use metamorphosis_core::checkpoint::Checkpoint;
use metamorphosis_core::config::{CheckpointBackend, CheckpointConfig};
use metamorphosis_core::error::{MetamorphosisError, Result};
use metamorphosis_core::traits::CheckpointStore;
use metamorphosis_core::types::ThreadId;

/// Open the store selected by `config`.
pub fn open_store(config: &CheckpointConfig) -> Result<Arc<dyn CheckpointStore>> {
    match config.backend {
        CheckpointBackend::Memory => Ok(Arc::new(MemoryCheckpointStore::new())),
        CheckpointBackend::Sqlite => {
            let path = config.resolved_path();
            let store = SqliteCheckpointStore::open(&path)?;
            info!(path = %path.display(), "Checkpoint store opened");
            Ok(Arc::new(store))
        }
    }
}

/// In-process checkpoint store. Lost when the process exits.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<ThreadId, Checkpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn put(&self, checkpoint: Checkpoint) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.checkpoints
                .write()
                .await
                .insert(checkpoint.thread_id.clone(), checkpoint);
            Ok(())
        })
    }

    fn get(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Checkpoint>> {
        let thread_id = thread_id.clone();
        Box::pin(async move {
            self.checkpoints
                .read()
                .await
                .get(&thread_id)
                .cloned()
                .ok_or_else(|| MetamorphosisError::CheckpointNotFound(thread_id.to_string()))
        })
    }

    fn delete(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<bool>> {
        let thread_id = thread_id.clone();
        Box::pin(async move { Ok(self.checkpoints.write().await.remove(&thread_id).is_some()) })
    }

    fn threads(&self) -> BoxFuture<'_, Result<Vec<ThreadId>>> {
        Box::pin(async move {
            let mut ids: Vec<ThreadId> = self.checkpoints.read().await.keys().cloned().collect();
            ids.sort();
            Ok(ids)
        })
    }
}

/// Persistent checkpoint store backed by SQLite, one row per thread.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
}

impl SqliteCheckpointStore {
    /// Open or create the checkpoint database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(db)?;
        Self::init(conn)
    }

    /// A private database that lives as long as the store.
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory().map_err(db)?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;

             CREATE TABLE IF NOT EXISTS checkpoints (
                 thread_id TEXT PRIMARY KEY,
                 state_json TEXT NOT NULL,
                 last_completed_node TEXT NOT NULL,
                 frontier_json TEXT NOT NULL DEFAULT '[]',
                 failures_json TEXT NOT NULL DEFAULT '[]',
                 updated_at TEXT NOT NULL
             );",
        )
        .map_err(db)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| MetamorphosisError::Database(e.to_string()))
    }
}

fn db(e: rusqlite::Error) -> MetamorphosisError {
    MetamorphosisError::Database(e.to_string())
}

impl CheckpointStore for SqliteCheckpointStore {
    fn put(&self, checkpoint: Checkpoint) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let state_json = serde_json::to_string(&checkpoint.state)?;
            let frontier_json = serde_json::to_string(&checkpoint.frontier)?;
            let failures_json = serde_json::to_string(&checkpoint.failures)?;

            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO checkpoints (thread_id, state_json, last_completed_node, frontier_json, failures_json, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(thread_id) DO UPDATE SET
                     state_json = excluded.state_json,
                     last_completed_node = excluded.last_completed_node,
                     frontier_json = excluded.frontier_json,
                     failures_json = excluded.failures_json,
                     updated_at = excluded.updated_at",
                params![
                    checkpoint.thread_id.as_str(),
                    state_json,
                    checkpoint.last_completed_node,
                    frontier_json,
                    failures_json,
                    checkpoint.updated_at.to_rfc3339(),
                ],
            )
            .map_err(db)?;
            Ok(())
        })
    }

    fn get(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<Checkpoint>> {
        let thread_id = thread_id.clone();
        Box::pin(async move {
            let row = {
                let conn = self.lock()?;
                conn.query_row(
                    "SELECT state_json, last_completed_node, frontier_json, failures_json, updated_at
                     FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id.as_str()],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                )
                .optional()
                .map_err(db)?
            };

            let Some((state_json, last_completed_node, frontier_json, failures_json, ts)) = row
            else {
                return Err(MetamorphosisError::CheckpointNotFound(thread_id.to_string()));
            };

            let updated_at = DateTime::parse_from_rfc3339(&ts)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| {
                    MetamorphosisError::Database(format!("bad updated_at for {thread_id}: {e}"))
                })?;

            Ok(Checkpoint {
                thread_id,
                state: serde_json::from_str(&state_json)?,
                last_completed_node,
                frontier: serde_json::from_str(&frontier_json)?,
                failures: serde_json::from_str(&failures_json)?,
                updated_at,
            })
        })
    }

    fn delete(&self, thread_id: &ThreadId) -> BoxFuture<'_, Result<bool>> {
        let thread_id = thread_id.clone();
        Box::pin(async move {
            let conn = self.lock()?;
            let deleted = conn
                .execute(
                    "DELETE FROM checkpoints WHERE thread_id = ?1",
                    params![thread_id.as_str()],
                )
                .map_err(db)?;
            Ok(deleted > 0)
        })
    }

    fn threads(&self) -> BoxFuture<'_, Result<Vec<ThreadId>>> {
        Box::pin(async move {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT thread_id FROM checkpoints ORDER BY thread_id")
                .map_err(db)?;
            let ids = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(db)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db)?;
            Ok(ids.into_iter().map(ThreadId).collect())
        })
    }
}

//! Durable storage for aggregate rows.
//!
//! The engine only needs two operations from storage: append one row of
//! per-metric means, and read back the newest N rows. [`SqliteStore`] keeps
//! them in a SQLite file; [`MemoryStore`] keeps them in process memory.
//!
//! # Schema
//!
//! ```text
//! historical_data
//!   id            INTEGER PRIMARY KEY AUTOINCREMENT
//!   timestamp_ms  INTEGER NOT NULL     -- assigned at append time (UTC)
//!   means         TEXT NOT NULL        -- JSON object: metric -> mean
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Per-metric means for one aggregate cycle.
pub type MetricMeans = BTreeMap<String, f64>;

/// One persisted snapshot of per-metric means.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRecord {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub means: MetricMeans,
}

/// Append-only store of aggregate rows.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Store one row; the store assigns its id and timestamp.
    async fn append(&self, means: MetricMeans) -> Result<AggregateRecord, StorageError>;

    /// Up to `limit` rows, newest first.
    async fn last_n(&self, limit: usize) -> Result<Vec<AggregateRecord>, StorageError>;
}

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS historical_data (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp_ms INTEGER NOT NULL,
    means        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_historical_data_ts ON historical_data (timestamp_ms);
";

/// SQLite-backed aggregate storage.
///
/// The connection sits behind a mutex and every statement runs on tokio's
/// blocking pool, so writes are serialised by the store itself.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create the database file and ensure the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                StorageError::Unavailable(format!("creating {}: {e}", parent.display()))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(SCHEMA)?;
        log::info!("database initialised at {}", path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open a throwaway in-memory database.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Task(e.to_string()))?
    }

    /// Total rows stored.
    pub async fn count(&self) -> Result<u64, StorageError> {
        self.with_conn(|conn| {
            let n: i64 =
                conn.query_row("SELECT COUNT(*) FROM historical_data", [], |row| row.get(0))?;
            Ok(n as u64)
        })
        .await
    }
}

fn insert_row(conn: &Connection, means: MetricMeans) -> Result<AggregateRecord, StorageError> {
    let timestamp = Utc::now();
    let json = serde_json::to_string(&means)?;
    conn.execute(
        "INSERT INTO historical_data (timestamp_ms, means) VALUES (?1, ?2)",
        rusqlite::params![timestamp.timestamp_millis(), json],
    )?;
    Ok(AggregateRecord {
        id: conn.last_insert_rowid(),
        timestamp,
        means,
    })
}

fn select_last_n(conn: &Connection, limit: usize) -> Result<Vec<AggregateRecord>, StorageError> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut stmt = conn.prepare(
        "SELECT id, timestamp_ms, means FROM historical_data \
         ORDER BY timestamp_ms DESC, id DESC \
         LIMIT ?1",
    )?;
    let rows = stmt.query_map(rusqlite::params![limit], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, String>(2)?,
        ))
    })?;

    let mut records = Vec::new();
    for row in rows {
        let (id, ts_ms, json) = row?;
        let timestamp = DateTime::from_timestamp_millis(ts_ms)
            .ok_or_else(|| StorageError::Corrupt(format!("row {id}: timestamp {ts_ms}")))?;
        records.push(AggregateRecord {
            id,
            timestamp,
            means: serde_json::from_str(&json)?,
        });
    }
    Ok(records)
}

#[async_trait]
impl Persistence for SqliteStore {
    async fn append(&self, means: MetricMeans) -> Result<AggregateRecord, StorageError> {
        self.with_conn(move |conn| insert_row(conn, means)).await
    }

    async fn last_n(&self, limit: usize) -> Result<Vec<AggregateRecord>, StorageError> {
        self.with_conn(move |conn| select_last_n(conn, limit)).await
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

/// Process-local store. Rows vanish with the process.
///
/// It can be switched offline to exercise outage handling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<AggregateRecord>>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StorageError::Unavailable`].
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_online(&self) -> Result<(), StorageError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Persistence for MemoryStore {
    async fn append(&self, means: MetricMeans) -> Result<AggregateRecord, StorageError> {
        self.check_online()?;
        let mut rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        let record = AggregateRecord {
            id: rows.len() as i64 + 1,
            timestamp: Utc::now(),
            means,
        };
        rows.push(record.clone());
        Ok(record)
    }

    async fn last_n(&self, limit: usize) -> Result<Vec<AggregateRecord>, StorageError> {
        self.check_online()?;
        let rows = self.rows.lock().unwrap_or_else(|e| e.into_inner());
        Ok(rows.iter().rev().take(limit).cloned().collect())
    }
}

//! SQLite-backed store.
//!
//! One table, one row per record:
//!
//! ```text
//! cache_records(
//!     key TEXT PRIMARY KEY, content BLOB, integrity_tag TEXT,
//!     created_at INTEGER, ttl_seconds INTEGER, size_bytes INTEGER,
//!     last_access INTEGER, model TEXT)
//! ```
//!
//! `rusqlite` is synchronous, so every call runs on tokio's blocking pool
//! behind a mutex-guarded connection. The database uses WAL journaling so
//! that out-of-process readers (the `huginn-cache` tool) do not block the
//! service.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

use super::{CacheStore, StoreError, StoreResult};
use crate::types::{CacheRecord, RecordMeta};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS cache_records (
    key           TEXT PRIMARY KEY NOT NULL,
    content       BLOB NOT NULL,
    integrity_tag TEXT NOT NULL,
    created_at    INTEGER NOT NULL,
    ttl_seconds   INTEGER NOT NULL,
    size_bytes    INTEGER NOT NULL,
    last_access   INTEGER NOT NULL,
    model         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cache_records_last_access
    ON cache_records (last_access);
";

const META_COLUMNS: &str = "key, size_bytes, created_at, ttl_seconds, last_access";

/// How long a writer waits on a locked database before giving up.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// [`CacheStore`] persisted in a SQLite database file.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`, creating parent directories.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        Self::init(conn, Some(path.to_path_buf()))
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, None)
    }

    fn init(conn: Connection, path: Option<PathBuf>) -> StoreResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        debug!(path = ?path, "opened sqlite cache store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path,
        })
    }

    /// Database file path, or `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> rusqlite::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::Unavailable("sqlite connection mutex poisoned".into()))?;
            f(&mut guard).map_err(StoreError::from)
        })
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
    }
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn meta_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordMeta> {
    Ok(RecordMeta {
        key: row.get(0)?,
        size_bytes: row.get::<_, i64>(1)?.max(0) as u64,
        created_at: row.get(2)?,
        ttl_seconds: row.get::<_, i64>(3)?.max(0) as u64,
        last_access: row.get(4)?,
    })
}

#[async_trait]
impl CacheStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, key: &str) -> StoreResult<Option<CacheRecord>> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT key, content, integrity_tag, created_at, ttl_seconds, size_bytes,
                        last_access, model
                 FROM cache_records WHERE key = ?1",
                params![key],
                |row| {
                    Ok(CacheRecord {
                        key: row.get(0)?,
                        content: row.get(1)?,
                        integrity_tag: row.get(2)?,
                        created_at: row.get(3)?,
                        ttl_seconds: row.get::<_, i64>(4)?.max(0) as u64,
                        size_bytes: row.get::<_, i64>(5)?.max(0) as u64,
                        last_access: row.get(6)?,
                        model: row.get(7)?,
                    })
                },
            )
            .optional()
        })
        .await
    }

    async fn save(&self, record: &CacheRecord) -> StoreResult<Option<u64>> {
        let record = record.clone();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let previous: Option<i64> = tx
                .query_row(
                    "SELECT size_bytes FROM cache_records WHERE key = ?1",
                    params![record.key],
                    |row| row.get(0),
                )
                .optional()?;
            tx.execute(
                "INSERT OR REPLACE INTO cache_records
                    (key, content, integrity_tag, created_at, ttl_seconds, size_bytes,
                     last_access, model)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    record.key,
                    record.content,
                    record.integrity_tag,
                    record.created_at,
                    to_i64(record.ttl_seconds),
                    to_i64(record.size_bytes),
                    record.last_access,
                    record.model,
                ],
            )?;
            tx.commit()?;
            Ok(previous.map(|s| s.max(0) as u64))
        })
        .await
    }

    async fn remove(&self, key: &str) -> StoreResult<Option<u64>> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            conn.query_row(
                "DELETE FROM cache_records WHERE key = ?1 RETURNING size_bytes",
                params![key],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|size| size.map(|s| s.max(0) as u64))
        })
        .await
    }

    async fn remove_if_unchanged(&self, record: &CacheRecord) -> StoreResult<Option<u64>> {
        let key = record.key.clone();
        let tag = record.integrity_tag.clone();
        let created_at = record.created_at;
        let ttl_seconds = to_i64(record.ttl_seconds);
        self.with_conn(move |conn| {
            conn.query_row(
                "DELETE FROM cache_records
                 WHERE key = ?1 AND integrity_tag = ?2 AND created_at = ?3 AND ttl_seconds = ?4
                 RETURNING size_bytes",
                params![key, tag, created_at, ttl_seconds],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|size| size.map(|s| s.max(0) as u64))
        })
        .await
    }

    async fn touch(&self, key: &str, last_access: i64) -> StoreResult<()> {
        let key = key.to_owned();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE cache_records SET last_access = ?2 WHERE key = ?1",
                params![key, last_access],
            )
            .map(|_| ())
        })
        .await
    }

    async fn total_size(&self) -> StoreResult<u64> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT COALESCE(SUM(size_bytes), 0) FROM cache_records",
                [],
                |row| row.get::<_, i64>(0),
            )
            .map(|s| s.max(0) as u64)
        })
        .await
    }

    async fn len(&self) -> StoreResult<u64> {
        self.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM cache_records", [], |row| {
                row.get::<_, i64>(0)
            })
            .map(|n| n.max(0) as u64)
        })
        .await
    }

    async fn least_recent(&self, limit: usize) -> StoreResult<Vec<RecordMeta>> {
        let limit = to_i64(limit as u64);
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {META_COLUMNS} FROM cache_records
                 ORDER BY last_access ASC, created_at ASC, key ASC LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], meta_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn scan(&self) -> StoreResult<Vec<RecordMeta>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {META_COLUMNS} FROM cache_records"))?;
            let rows = stmt.query_map([], meta_from_row)?;
            rows.collect()
        })
        .await
    }

    async fn clear(&self) -> StoreResult<u64> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM cache_records", [])
                .map(|n| n as u64)
        })
        .await
    }
}

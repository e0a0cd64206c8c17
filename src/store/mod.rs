//! Durable storage for cache records.
//!
//! [`CacheStore`] is the seam between the [`ResponseCache`](crate::cache::ResponseCache)
//! and whatever persists records. Stores are deliberately dumb: they do not
//! verify integrity tags, enforce TTLs or track capacity. All of that lives
//! in the cache layer, which serializes every mutating call it makes.
//!
//! Two implementations ship with the crate:
//!
//! - [`SqliteStore`]: a single SQLite file (WAL mode), the durable default.
//! - [`MemoryStore`]: a process-local map for tests and ephemeral runs.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::types::{CacheRecord, RecordMeta};

/// Storage backend failures.
///
/// Every variant means "the store could not answer"; callers treat them all
/// as a cache bypass rather than a request failure.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage worker failed: {0}")]
    Worker(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Key/value persistence for [`CacheRecord`]s.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Store name for logging/debugging.
    fn name(&self) -> &str;

    /// Fetch a record by key.
    async fn load(&self, key: &str) -> StoreResult<Option<CacheRecord>>;

    /// Insert or fully replace the record under `record.key`.
    ///
    /// Returns the `size_bytes` of the record that was replaced, if any.
    async fn save(&self, record: &CacheRecord) -> StoreResult<Option<u64>>;

    /// Delete a record. Returns the removed record's `size_bytes`.
    async fn remove(&self, key: &str) -> StoreResult<Option<u64>>;

    /// Delete `record.key` only while the stored row is still the version
    /// `record` describes: same `integrity_tag`, `created_at` and
    /// `ttl_seconds`.
    ///
    /// Lets a reader discard the exact version it inspected without
    /// clobbering a newer write that landed in between, including a rewrite
    /// of identical content.
    async fn remove_if_unchanged(&self, record: &CacheRecord) -> StoreResult<Option<u64>>;

    /// Set `last_access` for an existing record; missing keys are ignored.
    async fn touch(&self, key: &str, last_access: i64) -> StoreResult<()>;

    /// Sum of `size_bytes` over all stored records.
    async fn total_size(&self) -> StoreResult<u64>;

    /// Number of stored records.
    async fn len(&self) -> StoreResult<u64>;

    /// Up to `limit` records ordered by `last_access` ascending.
    async fn least_recent(&self, limit: usize) -> StoreResult<Vec<RecordMeta>>;

    /// Metadata for every stored record.
    async fn scan(&self) -> StoreResult<Vec<RecordMeta>>;

    /// Delete everything. Returns the number of records removed.
    async fn clear(&self) -> StoreResult<u64>;
}

//! Integrity-verified response cache.
//!
//! [`ResponseCache`] layers tag verification, TTL expiry and a byte-capacity
//! bound on top of a [`CacheStore`]. It is a best-effort optimization: every
//! store failure comes back as [`StoreError`] and callers are expected to
//! carry on with a live call.
//!
//! # Reads
//!
//! `get` loads the record, then:
//!
//! - absent → [`CacheLookup::Miss`]
//! - expired → removed, [`CacheLookup::Miss`]
//! - tag mismatch → removed, logged under `huginn::integrity`,
//!   [`CacheLookup::Corrupt`]
//! - otherwise `last_access` is bumped and the content returned.
//!
//! Removals on the read path are conditional on the version the reader saw
//! (tag, `created_at` and TTL), so a reader holding a stale version never
//! deletes a newer write, even one with identical content.
//!
//! # Writes and capacity
//!
//! Writes, removals and all accounting are serialized by one async mutex.
//! After every write the cache evicts least-recently-accessed records until
//! the byte total is back under `max_size_bytes`. Expired or corrupt
//! records met while evicting are purged without counting as evictions.
//!
//! With `memory_index` enabled the byte total and LRU order live in a
//! `MemoryIndex` rebuilt from the store at open; with it disabled both are
//! queried from the store and no in-memory structure is allocated.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, warn};

use super::index::MemoryIndex;
use super::integrity::IntegrityKey;
use crate::clock::{Clock, SystemClock};
use crate::store::{CacheStore, StoreError, StoreResult};
use crate::telemetry;
use crate::types::CacheRecord;

/// Records fetched per store query when evicting without the memory index.
const EVICTION_BATCH: usize = 32;

/// Configuration for the response cache.
///
/// ```rust
/// # use huginn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_size_bytes(64 * 1024 * 1024)
///     .ttl(Duration::from_secs(3600))
///     .memory_index(false);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on the summed `size_bytes` of stored records.
    /// Default: 256 MiB.
    pub max_size_bytes: u64,
    /// TTL for writes that do not specify one. Default: 24 hours.
    pub ttl: Duration,
    /// Keep byte totals and LRU order in memory. Default: true.
    pub memory_index: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: 256 * 1024 * 1024,
            ttl: Duration::from_secs(24 * 3600),
            memory_index: true,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_size_bytes(mut self, bytes: u64) -> Self {
        self.max_size_bytes = bytes;
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn memory_index(mut self, enabled: bool) -> Self {
        self.memory_index = enabled;
        self
    }
}

/// Verified content returned on a cache hit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedContent {
    pub content: Vec<u8>,
    pub model: String,
    /// Epoch seconds at which the record was written.
    pub created_at: i64,
}

/// Outcome of [`ResponseCache::get`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(CachedContent),
    Miss,
    /// The stored record failed verification and has been purged.
    Corrupt,
}

/// What an eviction pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    /// Live records removed to get under capacity.
    pub evicted: u64,
    /// Expired or corrupt records removed along the way.
    pub purged: u64,
    pub bytes_freed: u64,
}

/// Result of a full [`ResponseCache::verify_all`] scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub checked: u64,
    pub corrupt: u64,
    pub expired: u64,
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: u64,
    pub total_bytes: u64,
    pub capacity_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub corrupt: u64,
    pub evictions: u64,
    pub storage_errors: u64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    corrupt: AtomicU64,
    evictions: AtomicU64,
    storage_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
enum Removal {
    Expired,
    Corrupt,
    Lru,
}

impl Removal {
    fn label(self) -> &'static str {
        match self {
            Removal::Expired => "expired",
            Removal::Corrupt => "corrupt",
            Removal::Lru => "lru",
        }
    }
}

/// Integrity-verified, capacity-bounded cache over a [`CacheStore`].
///
/// Construct once at startup with [`open`](Self::open) and share via `Arc`.
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    key: IntegrityKey,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    index: Option<Mutex<MemoryIndex>>,
    write_lock: tokio::sync::Mutex<()>,
    counters: Counters,
}

impl ResponseCache {
    /// Open a cache over `store` using the system clock.
    pub async fn open(
        store: Arc<dyn CacheStore>,
        key: IntegrityKey,
        config: CacheConfig,
    ) -> StoreResult<Self> {
        Self::open_with_clock(store, key, config, Arc::new(SystemClock)).await
    }

    /// Open a cache with an explicit clock (tests use [`ManualClock`](crate::clock::ManualClock)).
    ///
    /// With the memory index enabled this scans the store once to rebuild
    /// byte totals and LRU order, then trims the store if a smaller
    /// capacity was configured since the last run.
    pub async fn open_with_clock(
        store: Arc<dyn CacheStore>,
        key: IntegrityKey,
        config: CacheConfig,
        clock: Arc<dyn Clock>,
    ) -> StoreResult<Self> {
        let index = if config.memory_index {
            let metas = store.scan().await?;
            Some(Mutex::new(MemoryIndex::from_scan(metas)))
        } else {
            None
        };
        let cache = Self {
            store,
            key,
            config,
            clock,
            index,
            write_lock: tokio::sync::Mutex::new(()),
            counters: Counters::default(),
        };
        let report = cache.evict_if_over_capacity().await?;
        debug!(
            store = cache.store.name(),
            memory_index = cache.index.is_some(),
            evicted = report.evicted,
            "response cache opened"
        );
        Ok(cache)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up `key`, verifying its integrity tag.
    pub async fn get(&self, key: &str) -> StoreResult<CacheLookup> {
        let record = match self.store.load(key).await {
            Ok(record) => record,
            Err(e) => return Err(self.storage_error("load", e)),
        };
        let Some(record) = record else {
            self.record_miss();
            return Ok(CacheLookup::Miss);
        };

        let now = self.clock.now_secs();
        if record.is_expired(now) {
            debug!(key, expired_at = record.expires_at(), "cache record expired");
            self.discard(&record, Removal::Expired).await;
            self.record_miss();
            return Ok(CacheLookup::Miss);
        }

        if !self.key.verify(&record.content, &record.integrity_tag) {
            self.report_corrupt(&record);
            self.discard(&record, Removal::Corrupt).await;
            return Ok(CacheLookup::Corrupt);
        }

        if let Err(e) = self.store.touch(key, now).await {
            // The hit is still good; only LRU ordering lost an update.
            let _ = self.storage_error("touch", e);
        }
        if let Some(index) = &self.index {
            lock_index(index).touch(key, now);
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
        debug!(key, size_bytes = record.size_bytes, "cache hit");
        Ok(CacheLookup::Hit(CachedContent {
            content: record.content,
            model: record.model,
            created_at: record.created_at,
        }))
    }

    /// Store `content` under `key`, replacing any existing record, then
    /// evict down to capacity.
    ///
    /// A zero TTL, or content larger than the whole capacity, is not stored;
    /// any older record under the key is removed instead so the cache never
    /// serves a version older than the latest write.
    pub async fn put(
        &self,
        key: &str,
        content: &[u8],
        ttl: Duration,
        model: &str,
    ) -> StoreResult<()> {
        let size_bytes = content.len() as u64;
        let ttl_seconds = ttl.as_secs();
        let _guard = self.write_lock.lock().await;

        if ttl_seconds == 0 || size_bytes > self.config.max_size_bytes {
            debug!(
                key,
                size_bytes,
                ttl_seconds,
                capacity = self.config.max_size_bytes,
                "response not cacheable; dropping any previous record"
            );
            self.remove_locked(key).await?;
            return Ok(());
        }

        let now = self.clock.now_secs();
        let record = CacheRecord {
            key: key.to_owned(),
            content: content.to_vec(),
            integrity_tag: self.key.sign(content),
            created_at: now,
            ttl_seconds,
            size_bytes,
            last_access: now,
            model: model.to_owned(),
        };

        let replaced = match self.store.save(&record).await {
            Ok(replaced) => replaced,
            Err(e) => return Err(self.storage_error("save", e)),
        };
        if let Some(index) = &self.index {
            lock_index(index).insert(key, size_bytes, now);
        }
        debug!(key, size_bytes, replaced = ?replaced, ttl_seconds, "cache record written");

        self.evict_locked().await?;
        Ok(())
    }

    /// Evict until the byte total is within capacity.
    pub async fn evict_if_over_capacity(&self) -> StoreResult<EvictionReport> {
        let _guard = self.write_lock.lock().await;
        self.evict_locked().await
    }

    /// Remove one record. Returns whether anything was removed.
    pub async fn invalidate(&self, key: &str) -> StoreResult<bool> {
        let _guard = self.write_lock.lock().await;
        let removed = self.remove_locked(key).await?;
        if removed.is_some() {
            metrics::counter!(telemetry::CACHE_REMOVALS_TOTAL, "reason" => "invalidated")
                .increment(1);
        }
        Ok(removed.is_some())
    }

    /// Remove every expired record. Returns how many were removed.
    ///
    /// Expiry is already enforced on read; this reclaims space held by
    /// records nobody asks for anymore.
    pub async fn purge_expired(&self) -> StoreResult<u64> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now_secs();
        let metas = self.store.scan().await.map_err(|e| self.storage_error("scan", e))?;
        let mut purged = 0;
        for meta in metas.into_iter().filter(|m| m.is_expired(now)) {
            if self.remove_locked(&meta.key).await?.is_some() {
                purged += 1;
                metrics::counter!(telemetry::CACHE_REMOVALS_TOTAL, "reason" => "expired")
                    .increment(1);
            }
        }
        if purged > 0 {
            debug!(purged, "purged expired cache records");
        }
        Ok(purged)
    }

    /// Verify every stored record, purging corrupt and expired ones.
    pub async fn verify_all(&self) -> StoreResult<IntegrityReport> {
        let _guard = self.write_lock.lock().await;
        let now = self.clock.now_secs();
        let metas = self.store.scan().await.map_err(|e| self.storage_error("scan", e))?;
        let mut report = IntegrityReport::default();
        for meta in metas {
            let record = self
                .store
                .load(&meta.key)
                .await
                .map_err(|e| self.storage_error("load", e))?;
            let Some(record) = record else {
                continue;
            };
            report.checked += 1;
            if record.is_expired(now) {
                self.remove_record_locked(&record, Removal::Expired).await?;
                report.expired += 1;
            } else if !self.key.verify(&record.content, &record.integrity_tag) {
                self.report_corrupt(&record);
                self.remove_record_locked(&record, Removal::Corrupt).await?;
                report.corrupt += 1;
            }
        }
        Ok(report)
    }

    /// Remove every record.
    pub async fn clear(&self) -> StoreResult<u64> {
        let _guard = self.write_lock.lock().await;
        let removed = self.store.clear().await.map_err(|e| self.storage_error("clear", e))?;
        if let Some(index) = &self.index {
            lock_index(index).clear();
        }
        self.publish_size(0);
        Ok(removed)
    }

    /// Current counters plus entry count and byte total.
    pub async fn stats(&self) -> StoreResult<CacheStats> {
        let (entries, total_bytes) = match &self.index {
            Some(index) => {
                let index = lock_index(index);
                (index.len() as u64, index.total_bytes())
            }
            None => (self.store.len().await?, self.store.total_size().await?),
        };
        Ok(CacheStats {
            entries,
            total_bytes,
            capacity_bytes: self.config.max_size_bytes,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            corrupt: self.counters.corrupt.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            storage_errors: self.counters.storage_errors.load(Ordering::Relaxed),
        })
    }

    // ========================================================================
    // Internals (callers of *_locked hold `write_lock`)
    // ========================================================================

    async fn evict_locked(&self) -> StoreResult<EvictionReport> {
        let limit = self.config.max_size_bytes;
        let mut report = EvictionReport::default();

        match &self.index {
            Some(index) => loop {
                let victim = {
                    let mut index = lock_index(index);
                    if index.total_bytes() <= limit {
                        break;
                    }
                    match index.peek_lru() {
                        Some(key) => key,
                        None => break,
                    }
                };
                self.remove_victim(&victim, &mut report).await?;
            },
            None => {
                let mut total = self.store.total_size().await?;
                while total > limit {
                    let batch = self.store.least_recent(EVICTION_BATCH).await?;
                    if batch.is_empty() {
                        break;
                    }
                    let removed_before = report.evicted + report.purged;
                    for meta in batch {
                        if total <= limit {
                            break;
                        }
                        let freed = self.remove_victim(&meta.key, &mut report).await?;
                        total = total.saturating_sub(freed);
                    }
                    if report.evicted + report.purged == removed_before {
                        warn!(total, capacity = limit, "eviction made no progress; store changed underneath");
                        break;
                    }
                }
            }
        }

        if report.evicted > 0 || report.purged > 0 {
            debug!(
                evicted = report.evicted,
                purged = report.purged,
                bytes_freed = report.bytes_freed,
                capacity = limit,
                "cache over capacity; evicted records"
            );
        }
        if let Some(index) = &self.index {
            let total = lock_index(index).total_bytes();
            self.publish_size(total);
        }
        Ok(report)
    }

    /// Remove the eviction candidate `key`, classifying why it went.
    async fn remove_victim(&self, key: &str, report: &mut EvictionReport) -> StoreResult<u64> {
        let Some(record) = self.store.load(key).await? else {
            // Gone from the store behind our back; drop the stale accounting.
            let freed = self.forget(key).unwrap_or(0);
            report.bytes_freed += freed;
            return Ok(freed);
        };

        let now = self.clock.now_secs();
        let reason = if record.is_expired(now) {
            Removal::Expired
        } else if !self.key.verify(&record.content, &record.integrity_tag) {
            self.report_corrupt(&record);
            Removal::Corrupt
        } else {
            Removal::Lru
        };

        let freed = self.remove_record_locked(&record, reason).await?;
        if freed == 0 {
            // Changed underneath us by another process; drop it from the
            // index so the eviction loop keeps making progress.
            self.forget(key);
        }
        match reason {
            Removal::Lru => {
                report.evicted += 1;
                self.counters.evictions.fetch_add(1, Ordering::Relaxed);
            }
            Removal::Expired | Removal::Corrupt => report.purged += 1,
        }
        report.bytes_freed += freed;
        Ok(freed)
    }

    /// Remove exactly this version of a record and fix accounting.
    async fn remove_record_locked(&self, record: &CacheRecord, reason: Removal) -> StoreResult<u64> {
        let removed = self
            .store
            .remove_if_unchanged(record)
            .await
            .map_err(|e| self.storage_error("remove", e))?;
        let freed = match removed {
            Some(size) => {
                self.forget(&record.key);
                metrics::counter!(telemetry::CACHE_REMOVALS_TOTAL, "reason" => reason.label())
                    .increment(1);
                size
            }
            None => 0,
        };
        Ok(freed)
    }

    async fn remove_locked(&self, key: &str) -> StoreResult<Option<u64>> {
        let removed = self
            .store
            .remove(key)
            .await
            .map_err(|e| self.storage_error("remove", e))?;
        self.forget(key);
        Ok(removed)
    }

    /// Read-path removal. Failures are logged; the read result stands.
    async fn discard(&self, record: &CacheRecord, reason: Removal) {
        let _guard = self.write_lock.lock().await;
        if let Err(e) = self.remove_record_locked(record, reason).await {
            warn!(key = %record.key, reason = reason.label(), error = %e, "failed to remove cache record");
        }
    }

    fn forget(&self, key: &str) -> Option<u64> {
        self.index.as_ref().and_then(|index| lock_index(index).remove(key))
    }

    fn record_miss(&self) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
    }

    fn report_corrupt(&self, record: &CacheRecord) {
        self.counters.corrupt.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_CORRUPT_TOTAL).increment(1);
        warn!(
            target: "huginn::integrity",
            key = %record.key,
            model = %record.model,
            size_bytes = record.size_bytes,
            created_at = record.created_at,
            "cache record failed integrity verification; purging"
        );
    }

    fn storage_error(&self, operation: &'static str, error: StoreError) -> StoreError {
        self.counters.storage_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_STORAGE_ERRORS_TOTAL).increment(1);
        warn!(store = self.store.name(), operation, error = %error, "cache store error; running degraded");
        error
    }

    fn publish_size(&self, total_bytes: u64) {
        metrics::gauge!(telemetry::CACHE_SIZE_BYTES).set(total_bytes as f64);
    }
}

/// Lock the index, recovering from poisoning.
///
/// Index updates are single assignments on plain data, so a panic while
/// holding the lock cannot leave it half-written.
fn lock_index(index: &Mutex<MemoryIndex>) -> MutexGuard<'_, MemoryIndex> {
    index.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

//! Process-local store

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use super::{CacheStore, StoreError, StoreResult};
use crate::types::{CacheRecord, RecordMeta};

/// [`CacheStore`] backed by a `HashMap`.
///
/// Nothing survives the process. Useful for tests and for deployments that
/// want integrity-checked memoization without a file on disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, CacheRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StoreResult<std::sync::RwLockReadGuard<'_, HashMap<String, CacheRecord>>> {
        self.records
            .read()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    fn write(&self) -> StoreResult<std::sync::RwLockWriteGuard<'_, HashMap<String, CacheRecord>>> {
        self.records
            .write()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, key: &str) -> StoreResult<Option<CacheRecord>> {
        Ok(self.read()?.get(key).cloned())
    }

    async fn save(&self, record: &CacheRecord) -> StoreResult<Option<u64>> {
        let previous = self.write()?.insert(record.key.clone(), record.clone());
        Ok(previous.map(|r| r.size_bytes))
    }

    async fn remove(&self, key: &str) -> StoreResult<Option<u64>> {
        Ok(self.write()?.remove(key).map(|r| r.size_bytes))
    }

    async fn remove_if_unchanged(&self, record: &CacheRecord) -> StoreResult<Option<u64>> {
        let mut records = self.write()?;
        match records.get(&record.key) {
            Some(stored)
                if stored.integrity_tag == record.integrity_tag
                    && stored.created_at == record.created_at
                    && stored.ttl_seconds == record.ttl_seconds =>
            {
                Ok(records.remove(&record.key).map(|r| r.size_bytes))
            }
            _ => Ok(None),
        }
    }

    async fn touch(&self, key: &str, last_access: i64) -> StoreResult<()> {
        if let Some(record) = self.write()?.get_mut(key) {
            record.last_access = last_access;
        }
        Ok(())
    }

    async fn total_size(&self) -> StoreResult<u64> {
        Ok(self.read()?.values().map(|r| r.size_bytes).sum())
    }

    async fn len(&self) -> StoreResult<u64> {
        Ok(self.read()?.len() as u64)
    }

    async fn least_recent(&self, limit: usize) -> StoreResult<Vec<RecordMeta>> {
        let mut metas: Vec<RecordMeta> = self.read()?.values().map(CacheRecord::meta).collect();
        metas.sort_by(|a, b| {
            a.last_access
                .cmp(&b.last_access)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.key.cmp(&b.key))
        });
        metas.truncate(limit);
        Ok(metas)
    }

    async fn scan(&self) -> StoreResult<Vec<RecordMeta>> {
        Ok(self.read()?.values().map(CacheRecord::meta).collect())
    }

    async fn clear(&self) -> StoreResult<u64> {
        let mut records = self.write()?;
        let count = records.len() as u64;
        records.clear();
        Ok(count)
    }
}

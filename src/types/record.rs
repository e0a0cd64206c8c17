//! Persisted cache record

/// One memoized response as stored in a [`CacheStore`](crate::store::CacheStore).
///
/// Records are only ever replaced whole; no field is updated in place
/// except `last_access`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheRecord {
    pub key: String,
    pub content: Vec<u8>,
    /// Hex HMAC-SHA256 of `content` under the process secret.
    pub integrity_tag: String,
    /// Epoch seconds.
    pub created_at: i64,
    pub ttl_seconds: u64,
    /// Content length at write time; the unit of capacity accounting.
    pub size_bytes: u64,
    /// Epoch seconds of the last successful read (or the write).
    pub last_access: i64,
    pub model: String,
}

impl CacheRecord {
    /// Epoch second at which the record stops being served.
    pub fn expires_at(&self) -> i64 {
        expires_at(self.created_at, self.ttl_seconds)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at()
    }

    pub fn meta(&self) -> RecordMeta {
        RecordMeta {
            key: self.key.clone(),
            size_bytes: self.size_bytes,
            created_at: self.created_at,
            ttl_seconds: self.ttl_seconds,
            last_access: self.last_access,
        }
    }
}

/// Record metadata without the payload, used for accounting scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMeta {
    pub key: String,
    pub size_bytes: u64,
    pub created_at: i64,
    pub ttl_seconds: u64,
    pub last_access: i64,
}

impl RecordMeta {
    pub fn expires_at(&self) -> i64 {
        expires_at(self.created_at, self.ttl_seconds)
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.expires_at()
    }
}

fn expires_at(created_at: i64, ttl_seconds: u64) -> i64 {
    created_at.saturating_add(i64::try_from(ttl_seconds).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(created_at: i64, ttl_seconds: u64) -> CacheRecord {
        CacheRecord {
            key: "k".into(),
            content: b"v".to_vec(),
            integrity_tag: String::new(),
            created_at,
            ttl_seconds,
            size_bytes: 1,
            last_access: created_at,
            model: "m".into(),
        }
    }

    #[test]
    fn record_expires_once_ttl_has_elapsed() {
        let r = record(1_000, 1);
        assert!(!r.is_expired(1_000));
        assert!(r.is_expired(1_001));
        assert!(r.is_expired(5_000));
    }

    #[test]
    fn huge_ttl_does_not_overflow() {
        let r = record(1_000, u64::MAX);
        assert_eq!(r.expires_at(), i64::MAX);
        assert!(!r.is_expired(i64::MAX - 1));
    }

    #[test]
    fn meta_mirrors_record() {
        let r = record(10, 5);
        let m = r.meta();
        assert_eq!(m.key, "k");
        assert_eq!(m.expires_at(), 15);
        assert!(m.is_expired(15));
    }
}

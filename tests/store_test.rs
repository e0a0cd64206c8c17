//! Conformance tests shared by every `CacheStore` implementation.

use huginn::store::{CacheStore, MemoryStore, SqliteStore};
use huginn::types::CacheRecord;

fn record(key: &str, content: &[u8], tag: &str, last_access: i64) -> CacheRecord {
    CacheRecord {
        key: key.to_string(),
        content: content.to_vec(),
        integrity_tag: tag.to_string(),
        created_at: 1_000,
        ttl_seconds: 60,
        size_bytes: content.len() as u64,
        last_access,
        model: "m".to_string(),
    }
}

async fn round_trip(store: &dyn CacheStore) {
    let rec = record("k", b"hello", "tag-1", 1_000);
    assert_eq!(store.save(&rec).await.unwrap(), None);
    assert_eq!(store.load("k").await.unwrap(), Some(rec));
    assert_eq!(store.load("missing").await.unwrap(), None);
}

async fn save_reports_replaced_size(store: &dyn CacheStore) {
    store.save(&record("k", b"12345", "t1", 1)).await.unwrap();
    let replaced = store.save(&record("k", b"12", "t2", 2)).await.unwrap();
    assert_eq!(replaced, Some(5));
    assert_eq!(store.total_size().await.unwrap(), 2);
    assert_eq!(store.len().await.unwrap(), 1);
}

async fn conditional_remove(store: &dyn CacheStore) {
    let old = record("k", b"abc", "old", 1);
    let new = record("k", b"abcd", "new", 2);
    store.save(&old).await.unwrap();
    store.save(&new).await.unwrap();

    // A reader holding the old version must not delete the new one.
    assert_eq!(store.remove_if_unchanged(&old).await.unwrap(), None);
    assert!(store.load("k").await.unwrap().is_some());

    assert_eq!(store.remove_if_unchanged(&new).await.unwrap(), Some(4));
    assert!(store.load("k").await.unwrap().is_none());
    assert_eq!(store.remove("k").await.unwrap(), None);
}

async fn conditional_remove_spares_identical_rewrite(store: &dyn CacheStore) {
    let first = record("k", b"same", "tag", 1);
    let rewrite = CacheRecord {
        created_at: 2_000,
        ttl_seconds: 3_600,
        ..first.clone()
    };
    store.save(&first).await.unwrap();
    store.save(&rewrite).await.unwrap();

    // Same content and tag, different write: still a different version.
    assert_eq!(store.remove_if_unchanged(&first).await.unwrap(), None);
    assert_eq!(store.load("k").await.unwrap(), Some(rewrite.clone()));

    // `last_access` is not part of the version; a touch must not shield it.
    store.touch("k", 9_999).await.unwrap();
    assert_eq!(store.remove_if_unchanged(&rewrite).await.unwrap(), Some(4));
}

async fn lru_order_and_touch(store: &dyn CacheStore) {
    store.save(&record("a", b"1", "t", 10)).await.unwrap();
    store.save(&record("b", b"22", "t", 20)).await.unwrap();
    store.save(&record("c", b"333", "t", 30)).await.unwrap();
    store.touch("a", 40).await.unwrap();
    store.touch("ghost", 50).await.unwrap();

    let keys: Vec<String> = store
        .least_recent(2)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.key)
        .collect();
    assert_eq!(keys, ["b", "c"]);

    let mut scanned: Vec<_> = store.scan().await.unwrap();
    scanned.sort_by(|x, y| x.key.cmp(&y.key));
    assert_eq!(scanned.len(), 3);
    assert_eq!(scanned[0].last_access, 40);
    assert_eq!(scanned[2].size_bytes, 3);

    assert_eq!(store.total_size().await.unwrap(), 6);
    assert_eq!(store.clear().await.unwrap(), 3);
    assert_eq!(store.total_size().await.unwrap(), 0);
    assert_eq!(store.len().await.unwrap(), 0);
}

macro_rules! store_suite {
    ($module:ident, $make:expr) => {
        mod $module {
            use super::*;

            #[tokio::test]
            async fn round_trip() {
                let store = $make;
                super::round_trip(&store).await;
            }

            #[tokio::test]
            async fn save_reports_replaced_size() {
                let store = $make;
                super::save_reports_replaced_size(&store).await;
            }

            #[tokio::test]
            async fn conditional_remove() {
                let store = $make;
                super::conditional_remove(&store).await;
            }

            #[tokio::test]
            async fn conditional_remove_spares_identical_rewrite() {
                let store = $make;
                super::conditional_remove_spares_identical_rewrite(&store).await;
            }

            #[tokio::test]
            async fn lru_order_and_touch() {
                let store = $make;
                super::lru_order_and_touch(&store).await;
            }
        }
    };
}

store_suite!(memory, MemoryStore::new());
store_suite!(sqlite_in_memory, SqliteStore::open_in_memory().unwrap());

#[tokio::test]
async fn sqlite_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("responses.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store.save(&record("k", b"durable", "t", 5)).await.unwrap();
        assert_eq!(store.path(), Some(path.as_path()));
    }

    let store = SqliteStore::open(&path).unwrap();
    let loaded = store.load("k").await.unwrap().unwrap();
    assert_eq!(loaded.content, b"durable");
    assert_eq!(loaded.last_access, 5);
}

#[tokio::test]
async fn sqlite_uses_wal_journal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("responses.db");
    let _store = SqliteStore::open(&path).unwrap();

    let conn = rusqlite::Connection::open(&path).unwrap();
    let mode: String = conn
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode.to_lowercase(), "wal");
}

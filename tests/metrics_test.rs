//! Tests for metrics integration.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter. The recorder is
//! thread-local, so these tests only assert on metrics emitted by the
//! calling task (cache and response metrics), not by dispatcher workers.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use huginn::cache::{CacheConfig, CacheLookup, IntegrityKey, ResponseCache};
use huginn::store::{CacheStore, MemoryStore};
use huginn::telemetry;
use huginn::{AgentRequest, Completion, Huginn, InferenceBackend, InferenceRequest, Result};

const SECRET: &str = "metrics-test-secret-0123456789abcdefgh";

struct EchoBackend;

#[async_trait]
impl InferenceBackend for EchoBackend {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<Completion> {
        Ok(Completion::new(request.prompt.clone(), request.model.clone()))
    }
}

// ============================================================================
// Snapshot helpers
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    counter_with_label(snapshot, name, None)
}

/// Sum counter values for `name`, optionally restricted to one label value.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .filter(|(key, _, _, _)| match label {
            Some((k, v)) => key.key().labels().any(|l| l.key() == k && l.value() == v),
            None => true,
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

fn gauge_value(snapshot: &SnapshotVec, name: &str) -> Option<f64> {
    snapshot
        .iter()
        .find(|(key, _, _, _)| key.kind() == MetricKind::Gauge && key.key().name() == name)
        .and_then(|(_, _, _, value)| match value {
            DebugValue::Gauge(v) => Some(v.into_inner()),
            _ => None,
        })
}

/// Run `fut` with `recorder` installed on this thread.
fn with_recorder<F, T>(recorder: &DebuggingRecorder, fut: F) -> T
where
    F: std::future::Future<Output = T>,
{
    metrics::with_local_recorder(recorder, || {
        tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(fut))
    })
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn cache_lookups_record_hits_misses_and_corruption() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    with_recorder(&recorder, async {
        let store = Arc::new(MemoryStore::new());
        let cache = ResponseCache::open(
            store.clone(),
            IntegrityKey::new(SECRET).unwrap(),
            CacheConfig::default(),
        )
        .await
        .unwrap();
        let hour = Duration::from_secs(3600);

        assert_eq!(cache.get("a").await.unwrap(), CacheLookup::Miss);
        cache.put("a", b"alpha", hour, "m").await.unwrap();
        assert!(matches!(cache.get("a").await.unwrap(), CacheLookup::Hit(_)));

        let mut record = store.load("a").await.unwrap().unwrap();
        record.content = b"omega".to_vec();
        store.save(&record).await.unwrap();
        assert_eq!(cache.get("a").await.unwrap(), CacheLookup::Corrupt);
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_HITS_TOTAL), 1);
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_CORRUPT_TOTAL), 1);
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::CACHE_REMOVALS_TOTAL,
            Some(("reason", "corrupt"))
        ),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn eviction_records_removals_and_size_gauge() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    with_recorder(&recorder, async {
        let cache = ResponseCache::open(
            Arc::new(MemoryStore::new()),
            IntegrityKey::new(SECRET).unwrap(),
            CacheConfig::new().max_size_bytes(10),
        )
        .await
        .unwrap();
        let hour = Duration::from_secs(3600);
        cache.put("a", b"123456", hour, "m").await.unwrap();
        cache.put("b", b"7890", hour, "m").await.unwrap();
        cache.put("c", b"xyz", hour, "m").await.unwrap();
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(
            &snapshot,
            telemetry::CACHE_REMOVALS_TOTAL,
            Some(("reason", "lru"))
        ),
        1
    );
    assert_eq!(gauge_value(&snapshot, telemetry::CACHE_SIZE_BYTES), Some(7.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn responses_are_counted_by_source() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    with_recorder(&recorder, async {
        let huginn = Huginn::builder()
            .backend(Arc::new(EchoBackend))
            .integrity_secret(SECRET)
            .build()
            .await
            .unwrap();
        let request = AgentRequest::new("agent", "hello", "m");
        assert!(huginn.run(request.clone()).await.is_success());
        assert!(huginn.run(request).await.is_success());
    });

    let snapshot = snapshotter.snapshot().into_vec();
    assert_eq!(
        counter_with_label(&snapshot, telemetry::RESPONSES_TOTAL, Some(("source", "live"))),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::RESPONSES_TOTAL, Some(("source", "cache"))),
        1
    );
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let huginn = Huginn::builder()
        .backend(Arc::new(EchoBackend))
        .enable_cache(false)
        .build()
        .await
        .unwrap();
    let result = huginn.run(AgentRequest::new("agent", "hi", "m")).await;
    assert!(result.is_success());
}

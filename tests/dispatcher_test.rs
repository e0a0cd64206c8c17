//! Tests for the concurrency-bounded dispatcher.
//!
//! Every test runs on a paused clock, so elapsed-time assertions are exact
//! and nothing actually sleeps.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_test::{assert_pending, assert_ready};
use tokio_util::sync::CancellationToken;

use huginn::dispatch::{
    DispatchConfig, Dispatcher, InferenceBackend, RetryConfig, Task, TaskOutcome, TaskState,
};
use huginn::types::{Completion, InferenceRequest};
use huginn::{HuginnError, Result};

// ============================================================================
// Mock backend
// ============================================================================

/// Behaviour is scripted by the prompt: `"<delay_ms> <action>"` where
/// action is `ok`, `fail`, `empty` or `panic`.
#[derive(Default)]
struct ScriptedBackend {
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedBackend {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &InferenceRequest) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        let mut parts = request.prompt.split_whitespace();
        let delay: u64 = parts.next().and_then(|d| d.parse().ok()).unwrap_or(0);
        let action = parts.next().unwrap_or("ok");

        tokio::time::sleep(Duration::from_millis(delay)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match action {
            "fail" => Err(HuginnError::Backend("upstream returned 500".into())),
            "empty" => Err(HuginnError::EmptyResponse),
            "panic" => panic!("backend bug"),
            _ => Ok(Completion::new(request.prompt.clone(), request.model.clone())),
        }
    }
}

fn task(key: &str, prompt: &str) -> Task {
    Task::new(
        key,
        InferenceRequest {
            agent: "agent".into(),
            prompt: prompt.into(),
            model: "model".into(),
            params: Default::default(),
            timeout: Duration::from_secs(1),
        },
    )
}

fn dispatcher(backend: Arc<ScriptedBackend>, max_concurrent: usize) -> Dispatcher {
    Dispatcher::new(
        backend,
        DispatchConfig::new()
            .max_concurrent(max_concurrent)
            .timeout(Duration::from_secs(1))
            .retry(RetryConfig::disabled()),
    )
    .unwrap()
}

/// The paused clock only moves in whole timer ticks; allow a little slack.
fn assert_elapsed(elapsed: Duration, expected_ms: u64) {
    let expected = Duration::from_millis(expected_ms);
    assert!(
        elapsed >= expected && elapsed < expected + Duration::from_millis(5),
        "elapsed {elapsed:?}, expected about {expected:?}"
    );
}

// ============================================================================
// Concurrency bound
// ============================================================================

#[tokio::test(start_paused = true)]
async fn never_exceeds_max_concurrent() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend.clone(), 2);

    let tasks = (0..6).map(|i| task(&format!("k{i}"), "50 ok")).collect();
    let started = Instant::now();
    let results = dispatcher.run_batch(tasks).await;

    assert!(results.iter().all(|r| r.outcome.is_success()));
    assert_eq!(backend.calls(), 6);
    assert_eq!(backend.peak(), 2);
    assert_eq!(dispatcher.stats().peak_in_flight, 2);
    assert_eq!(dispatcher.stats().in_flight, 0);
    // Three waves of two.
    assert_elapsed(started.elapsed(), 150);
}

#[tokio::test(start_paused = true)]
async fn third_task_waits_for_a_free_slot() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend.clone(), 2);

    let started = Instant::now();
    let results = dispatcher
        .run_batch(vec![
            task("a", "50 ok"),
            task("b", "50 ok"),
            task("c", "10 ok"),
        ])
        .await;

    assert!(results.iter().all(|r| r.outcome.is_success()));
    assert_elapsed(started.elapsed(), 60);
    assert_eq!(backend.peak(), 2);
}

#[tokio::test(start_paused = true)]
async fn results_keep_submission_order() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend, 4);

    let results = dispatcher
        .run_batch(vec![
            task("slow", "40 ok"),
            task("fast", "1 ok"),
            task("medium", "20 ok"),
        ])
        .await;

    let keys: Vec<&str> = results.iter().map(|r| r.key.as_str()).collect();
    assert_eq!(keys, ["slow", "fast", "medium"]);
    assert_eq!(
        results[1].outcome.completion().unwrap().text(),
        Some("1 ok")
    );
}

// ============================================================================
// Failure isolation
// ============================================================================

#[tokio::test(start_paused = true)]
async fn one_timeout_does_not_affect_the_others() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend, 5);

    let tasks = vec![
        task("t1", "10 ok"),
        task("t2", "10 ok"),
        task("t3", "5000 ok").timeout(Duration::from_millis(100)),
        task("t4", "10 ok"),
        task("t5", "10 ok"),
    ];
    let results = dispatcher.run_batch(tasks).await;

    for (i, result) in results.iter().enumerate() {
        if i == 2 {
            assert_eq!(result.outcome, TaskOutcome::TimedOut(Duration::from_millis(100)));
        } else {
            assert!(result.outcome.is_success(), "task {i}: {}", result.outcome);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_task_releases_its_slot() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend, 1);

    let started = Instant::now();
    let results = dispatcher
        .run_batch(vec![
            task("stuck", "10000 ok").timeout(Duration::from_millis(100)),
            task("next", "10 ok"),
        ])
        .await;

    assert!(matches!(results[0].outcome, TaskOutcome::TimedOut(_)));
    assert!(results[1].outcome.is_success());
    assert_elapsed(started.elapsed(), 110);
}

#[tokio::test(start_paused = true)]
async fn backend_errors_are_reported_per_task() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend, 3);

    let results = dispatcher
        .run_batch(vec![
            task("ok", "5 ok"),
            task("bad", "5 fail"),
            task("empty", "5 empty"),
        ])
        .await;

    assert!(results[0].outcome.is_success());
    match &results[1].outcome {
        TaskOutcome::Failed(reason) => assert!(reason.contains("500"), "{reason}"),
        other => panic!("expected failure, got {other}"),
    }
    assert!(matches!(results[2].outcome, TaskOutcome::Failed(_)));
}

#[tokio::test(start_paused = true)]
async fn panicking_backend_fails_only_its_task() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend.clone(), 1);

    let results = dispatcher
        .run_batch(vec![task("boom", "5 panic"), task("fine", "5 ok")])
        .await;

    assert_eq!(
        results[0].outcome,
        TaskOutcome::Failed("backend panicked".into())
    );
    assert!(results[1].outcome.is_success());
    assert_eq!(dispatcher.stats().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn into_result_maps_outcomes_to_errors() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend, 2);

    let results = dispatcher
        .run_batch(vec![
            task("bad", "1 fail"),
            task("slow", "5000 ok").timeout(Duration::from_millis(10)),
        ])
        .await;

    let mut results = results.into_iter();
    assert!(matches!(
        results.next().unwrap().outcome.into_result(),
        Err(HuginnError::Dispatch(_))
    ));
    assert!(matches!(
        results.next().unwrap().outcome.into_result(),
        Err(HuginnError::Timeout(_))
    ));
}

// ============================================================================
// Cancellation and lifecycle
// ============================================================================

#[tokio::test(start_paused = true)]
async fn cancelled_before_dispatch_never_calls_backend() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend.clone(), 1);

    let mut first = dispatcher.submit(task("first", "100 ok"));
    assert_eq!(first.changed().await, TaskState::Dispatched);

    let token = CancellationToken::new();
    let queued = dispatcher.submit_with_cancel(task("queued", "10 ok"), token.clone());
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(queued.state(), TaskState::Pending);

    token.cancel();
    let queued = queued.wait().await;
    assert_eq!(queued.outcome, TaskOutcome::Cancelled);

    assert!(first.wait().await.outcome.is_success());
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_everything_still_queued() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend.clone(), 1);

    let mut running = dispatcher.submit(task("running", "50 ok"));
    assert_eq!(running.changed().await, TaskState::Dispatched);
    let queued: Vec<_> = (0..3)
        .map(|i| dispatcher.submit(task(&format!("q{i}"), "10 ok")))
        .collect();

    dispatcher.shutdown();

    // The in-flight call is allowed to finish.
    assert!(running.wait().await.outcome.is_success());
    for handle in queued {
        assert_eq!(handle.wait().await.outcome, TaskOutcome::Cancelled);
    }
    assert_eq!(backend.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn batch_token_cancels_only_that_batch() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend.clone(), 1);

    let mut blocker = dispatcher.submit(task("blocker", "50 ok"));
    assert_eq!(blocker.changed().await, TaskState::Dispatched);

    let token = CancellationToken::new();
    token.cancel();
    let cancelled = dispatcher
        .run_batch_with_cancel(vec![task("x", "1 ok"), task("y", "1 ok")], &token)
        .await;
    assert!(cancelled.iter().all(|r| r.outcome == TaskOutcome::Cancelled));

    let after = dispatcher.run_batch(vec![task("z", "1 ok")]).await;
    assert!(after[0].outcome.is_success());
    assert!(blocker.wait().await.outcome.is_success());
}

#[tokio::test(start_paused = true)]
async fn handle_is_pending_until_backend_returns() {
    let backend = Arc::new(ScriptedBackend::default());
    let dispatcher = dispatcher(backend, 1);

    let handle = dispatcher.submit(task("k", "30 ok"));
    assert_eq!(handle.key(), "k");
    let mut wait = tokio_test::task::spawn(handle.wait());
    assert_pending!(wait.poll());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(wait.is_woken());
    let result = assert_ready!(wait.poll());
    assert!(result.outcome.is_success());
    assert_elapsed(result.elapsed, 30);
}

#[tokio::test]
async fn invalid_limits_are_rejected() {
    let backend: Arc<dyn InferenceBackend> = Arc::new(ScriptedBackend::default());

    for config in [
        DispatchConfig::new().max_concurrent(0),
        DispatchConfig::new().timeout(Duration::ZERO),
        DispatchConfig::new().retry(RetryConfig::new().max_attempts(0)),
    ] {
        let err = Dispatcher::new(backend.clone(), config).err().unwrap();
        assert!(matches!(err, HuginnError::Configuration(_)), "{err}");
    }
}

//! Concurrency-bounded dispatcher.
//!
//! Every submitted [`Task`] runs on its own tokio task:
//!
//! ```text
//!  submit ──► Pending ──(permit)──► Dispatched ──► Succeeded
//!               │                       ├────────► Failed(reason)
//!               │ cancelled             └─(timeout)► TimedOut
//!               ▼
//!           Cancelled
//! ```
//!
//! Admission goes through one [`Semaphore`] with `max_concurrent` permits,
//! created in [`Dispatcher::new`] before any task can be submitted. A task
//! holds its permit for the whole dispatched phase (retries and backoff
//! included) and releases it when it completes, fails, times out, or
//! panics. Tasks are isolated from each other: nothing one task does can
//! fail, block or cancel a sibling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{Semaphore, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::retry::{RetryConfig, with_retry};
use super::task::{Task, TaskHandle, TaskId, TaskOutcome, TaskResult, TaskState};
use super::traits::InferenceBackend;
use crate::telemetry;
use crate::{HuginnError, Result};

/// Dispatcher limits.
///
/// ```rust
/// # use huginn::{DispatchConfig, RetryConfig};
/// # use std::time::Duration;
/// let config = DispatchConfig::new()
///     .max_concurrent(4)
///     .timeout(Duration::from_secs(30))
///     .retry(RetryConfig::disabled());
/// ```
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum external calls in flight at once. Default: 8.
    pub max_concurrent: usize,
    /// Budget for a task's dispatched phase unless the task overrides it.
    /// Default: 120s.
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            timeout: Duration::from_secs(120),
            retry: RetryConfig::default(),
        }
    }
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Reject limits the dispatcher cannot honour.
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent == 0 {
            return Err(HuginnError::Configuration(
                "max_concurrent must be at least 1".into(),
            ));
        }
        if self.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(HuginnError::Configuration(format!(
                "max_concurrent must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.timeout.is_zero() {
            return Err(HuginnError::Configuration(
                "timeout must be greater than zero".into(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(HuginnError::Configuration(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Snapshot of dispatcher load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub max_concurrent: usize,
    /// Calls holding a permit right now.
    pub in_flight: usize,
    /// Highest `in_flight` ever observed.
    pub peak_in_flight: usize,
    pub submitted: u64,
}

struct Inner {
    backend: Arc<dyn InferenceBackend>,
    semaphore: Arc<Semaphore>,
    config: DispatchConfig,
    shutdown: CancellationToken,
    next_id: AtomicU64,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Issues calls to an [`InferenceBackend`] under a concurrency limit and
/// per-task timeout. Cheap to clone; clones share the same limit.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher. Fails on invalid limits.
    pub fn new(backend: Arc<dyn InferenceBackend>, config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent));
        Ok(Self {
            inner: Arc::new(Inner {
                backend,
                semaphore,
                config,
                shutdown: CancellationToken::new(),
                next_id: AtomicU64::new(0),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        })
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.inner.config
    }

    pub fn backend_name(&self) -> &str {
        self.inner.backend.name()
    }

    /// Submit a task. It starts as soon as a permit is free.
    ///
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, task: Task) -> TaskHandle {
        self.submit_with_cancel(task, self.inner.shutdown.child_token())
    }

    /// Submit a task that is abandoned if `cancel` fires before dispatch.
    ///
    /// Cancellation is cooperative: it is checked while waiting for a
    /// permit and again right before the call. Once dispatched, the task
    /// runs to completion or timeout.
    pub fn submit_with_cancel(&self, task: Task, cancel: CancellationToken) -> TaskHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let key = task.key.clone();
        let (state_tx, state_rx) = watch::channel(TaskState::Pending);
        let submitted = Instant::now();
        let inner = Arc::clone(&self.inner);
        let join = tokio::spawn(execute(inner, id, task, cancel, state_tx, submitted));
        TaskHandle {
            id,
            key,
            state: state_rx,
            join,
            submitted,
        }
    }

    /// Run tasks concurrently; results come back in submission order.
    pub async fn run_batch(&self, tasks: Vec<Task>) -> Vec<TaskResult> {
        self.run_batch_with_cancel(tasks, &self.inner.shutdown).await
    }

    /// [`run_batch`](Self::run_batch) with a batch-wide cancellation token.
    pub async fn run_batch_with_cancel(
        &self,
        tasks: Vec<Task>,
        cancel: &CancellationToken,
    ) -> Vec<TaskResult> {
        let handles: Vec<TaskHandle> = tasks
            .into_iter()
            .map(|task| self.submit_with_cancel(task, cancel.child_token()))
            .collect();
        join_all(handles.into_iter().map(TaskHandle::wait)).await
    }

    /// Cancel every task that has not been dispatched yet, across all
    /// batches. In-flight calls finish on their own.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Token cancelled by [`shutdown`](Self::shutdown); batch tokens should
    /// be children of it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.inner.shutdown
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            max_concurrent: self.inner.config.max_concurrent,
            in_flight: self.inner.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.inner.peak_in_flight.load(Ordering::SeqCst),
            submitted: self.inner.next_id.load(Ordering::Relaxed),
        }
    }
}

/// Counts a call as in flight for as long as it lives.
struct InFlight<'a> {
    inner: &'a Inner,
}

impl<'a> InFlight<'a> {
    fn enter(inner: &'a Inner) -> Self {
        let now = inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        metrics::gauge!(telemetry::DISPATCH_IN_FLIGHT).increment(1.0);
        Self { inner }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
        metrics::gauge!(telemetry::DISPATCH_IN_FLIGHT).decrement(1.0);
    }
}

/// Publishes state changes; marks the task failed if it unwinds mid-call.
struct StateReporter {
    tx: watch::Sender<TaskState>,
}

impl StateReporter {
    fn set(&self, state: TaskState) {
        self.tx.send_replace(state);
    }
}

impl Drop for StateReporter {
    fn drop(&mut self) {
        if !self.tx.borrow().is_terminal() {
            self.tx
                .send_replace(TaskState::Failed("backend panicked".into()));
        }
    }
}

async fn execute(
    inner: Arc<Inner>,
    id: TaskId,
    task: Task,
    cancel: CancellationToken,
    state_tx: watch::Sender<TaskState>,
    submitted: Instant,
) -> TaskResult {
    let reporter = StateReporter { tx: state_tx };
    let backend_name = inner.backend.name().to_owned();

    let permit = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        permit = Arc::clone(&inner.semaphore).acquire_owned() => permit.ok(),
    };

    let outcome = match permit {
        Some(_) if cancel.is_cancelled() => TaskOutcome::Cancelled,
        None if cancel.is_cancelled() => TaskOutcome::Cancelled,
        None => TaskOutcome::Failed("dispatcher closed".into()),
        Some(permit) => {
            reporter.set(TaskState::Dispatched);
            let outcome = dispatch(&inner, id, &task).await;
            drop(permit);
            outcome
        }
    };

    reporter.set(outcome.state());
    metrics::counter!(
        telemetry::DISPATCH_TOTAL,
        "backend" => backend_name,
        "status" => outcome.status(),
    )
    .increment(1);

    TaskResult {
        id,
        key: task.key,
        outcome,
        elapsed: submitted.elapsed(),
    }
}

/// The dispatched phase: the call (with retries) under the task's timeout.
async fn dispatch(inner: &Inner, id: TaskId, task: &Task) -> TaskOutcome {
    let _in_flight = InFlight::enter(inner);
    let timeout = task.timeout.unwrap_or(inner.config.timeout);
    let mut request = task.request.clone();
    request.timeout = timeout;

    let backend = inner.backend.as_ref();
    let started = Instant::now();
    debug!(task_id = id, key = %task.key, backend = backend.name(), ?timeout, "dispatching");

    let result = tokio::time::timeout(
        timeout,
        with_retry(&inner.config.retry, backend.name(), || {
            backend.complete(&request)
        }),
    )
    .await;

    let elapsed = started.elapsed();
    metrics::histogram!(
        telemetry::DISPATCH_DURATION_SECONDS,
        "backend" => backend.name().to_owned(),
    )
    .record(elapsed.as_secs_f64());

    match result {
        Ok(Ok(completion)) => {
            debug!(task_id = id, key = %task.key, elapsed_ms = elapsed.as_millis() as u64, "task succeeded");
            TaskOutcome::Succeeded(completion)
        }
        Ok(Err(e)) => {
            warn!(task_id = id, key = %task.key, error = %e, "task failed");
            TaskOutcome::Failed(e.to_string())
        }
        Err(_) => {
            warn!(task_id = id, key = %task.key, ?timeout, "task timed out");
            TaskOutcome::TimedOut(timeout)
        }
    }
}

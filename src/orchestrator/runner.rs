//! Orchestrator - cache probe, dispatch, write-through

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared, join_all};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheLookup, ResponseCache};
use crate::dispatch::{Dispatcher, Task, TaskOutcome};
use crate::telemetry;
use crate::types::{AgentRequest, Completion};
use crate::Result;

type Flight = Shared<BoxFuture<'static, TaskOutcome>>;
type FlightMap = Arc<Mutex<HashMap<String, Flight>>>;

/// Where a [`RunResult`] came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseSource {
    /// Verified cache hit; no external call.
    Cache,
    /// This request made the external call.
    Live,
    /// Joined an identical request's in-flight call.
    Coalesced,
}

impl ResponseSource {
    pub fn label(self) -> &'static str {
        match self {
            ResponseSource::Cache => "cache",
            ResponseSource::Live => "live",
            ResponseSource::Coalesced => "coalesced",
        }
    }
}

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunResult {
    /// Fingerprint key of the request.
    pub key: String,
    pub source: ResponseSource,
    pub outcome: TaskOutcome,
}

impl RunResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }

    pub fn completion(&self) -> Option<&Completion> {
        self.outcome.completion()
    }

    pub fn into_result(self) -> Result<Completion> {
        self.outcome.into_result()
    }
}

/// Composes the [`ResponseCache`] and [`Dispatcher`] into one entry point.
///
/// Built by [`HuginnBuilder`](super::HuginnBuilder). Requests that share a
/// fingerprint while a call for it is in flight are coalesced onto that
/// call (single-flight); only one external call is made per key at a time.
pub struct Orchestrator {
    cache: Option<Arc<ResponseCache>>,
    dispatcher: Dispatcher,
    default_ttl: Duration,
    flights: FlightMap,
}

impl Orchestrator {
    pub(crate) fn new(
        cache: Option<Arc<ResponseCache>>,
        dispatcher: Dispatcher,
        default_ttl: Duration,
    ) -> Self {
        Self {
            cache,
            dispatcher,
            default_ttl,
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The response cache, or `None` when caching is disabled.
    pub fn cache(&self) -> Option<&Arc<ResponseCache>> {
        self.cache.as_ref()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Answer one request from cache or by dispatching it.
    pub async fn run(&self, request: AgentRequest) -> RunResult {
        let cancel = self.dispatcher.shutdown_token().child_token();
        self.run_with_cancel(request, cancel).await
    }

    /// [`run`](Self::run) that is abandoned if `cancel` fires before dispatch.
    ///
    /// A request that joined another caller's flight never inherits that
    /// caller's cancellation or shorter timeout: if the shared call ends
    /// `Cancelled` while `cancel` is still live, or times out under a budget
    /// smaller than this request's own, the request starts its own call.
    pub async fn run_with_cancel(&self, request: AgentRequest, cancel: CancellationToken) -> RunResult {
        let key = request.fingerprint();

        if let Some(hit) = self.probe(&key).await {
            return self.finish(key, ResponseSource::Cache, TaskOutcome::Succeeded(hit));
        }

        let timeout = request
            .timeout
            .unwrap_or(self.dispatcher.config().timeout);
        loop {
            let (flight, leader) = self.join_flight(&key, &request, timeout, &cancel);
            let _cleanup = leader.then(|| FlightCleanup {
                flights: Arc::clone(&self.flights),
                key: key.clone(),
                flight: flight.clone(),
            });
            let outcome = flight.await;

            if leader {
                return self.finish(key, ResponseSource::Live, outcome);
            }
            if inherited_failure(&outcome, timeout, &cancel) {
                debug!(key = %key, outcome = %outcome, "joined call failed under another caller's limits; dispatching own call");
                continue;
            }
            return self.finish(key, ResponseSource::Coalesced, outcome);
        }
    }

    /// Run requests concurrently; results come back in submission order.
    ///
    /// Cache hits are served without taking a concurrency slot; misses
    /// share the dispatcher's bound with every other caller.
    pub async fn run_batch(&self, requests: Vec<AgentRequest>) -> Vec<RunResult> {
        let cancel = self.dispatcher.shutdown_token().child_token();
        self.run_batch_with_cancel(requests, &cancel).await
    }

    /// [`run_batch`](Self::run_batch) with a batch-wide cancellation token.
    pub async fn run_batch_with_cancel(
        &self,
        requests: Vec<AgentRequest>,
        cancel: &CancellationToken,
    ) -> Vec<RunResult> {
        join_all(
            requests
                .into_iter()
                .map(|request| self.run_with_cancel(request, cancel.child_token())),
        )
        .await
    }

    /// Cancel everything not yet dispatched.
    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }

    /// Cache probe. Every failure mode degrades to `None` (dispatch live).
    async fn probe(&self, key: &str) -> Option<Completion> {
        let cache = self.cache.as_ref()?;
        match cache.get(key).await {
            Ok(CacheLookup::Hit(hit)) => Some(Completion {
                content: hit.content,
                model: hit.model,
            }),
            Ok(CacheLookup::Miss) => None,
            Ok(CacheLookup::Corrupt) => {
                debug!(key, "discarded corrupt cache record; dispatching live");
                None
            }
            Err(e) => {
                warn!(key, error = %e, "cache unavailable; dispatching live");
                None
            }
        }
    }

    /// Join the in-flight call for `key`, or start one. Returns whether
    /// this caller is the leader.
    ///
    /// A finished flight whose leader has not yet cleared it is replaced,
    /// never joined.
    fn join_flight(
        &self,
        key: &str,
        request: &AgentRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> (Flight, bool) {
        let mut flights = self
            .flights
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(flight) = flights.get(key)
            && flight.peek().is_none()
        {
            debug!(key, "joining in-flight call");
            return (flight.clone(), false);
        }

        let ttl = request.ttl.unwrap_or(self.default_ttl);
        let task = Task::new(key, request.to_inference(timeout)).timeout(timeout);
        let flight = live_call(
            self.dispatcher.clone(),
            self.cache.clone(),
            task,
            ttl,
            cancel.clone(),
        )
        .boxed()
        .shared();
        flights.insert(key.to_owned(), flight.clone());
        (flight, true)
    }

    fn finish(&self, key: String, source: ResponseSource, outcome: TaskOutcome) -> RunResult {
        metrics::counter!(telemetry::RESPONSES_TOTAL, "source" => source.label()).increment(1);
        debug!(key = %key, source = source.label(), outcome = %outcome, "request finished");
        RunResult {
            key,
            source,
            outcome,
        }
    }
}

/// Dispatch `task` and write a successful result through to the cache.
///
/// A failed write is logged and otherwise ignored: the caller still gets
/// the live result.
async fn live_call(
    dispatcher: Dispatcher,
    cache: Option<Arc<ResponseCache>>,
    task: Task,
    ttl: Duration,
    cancel: CancellationToken,
) -> TaskOutcome {
    let result = dispatcher.submit_with_cancel(task, cancel).wait().await;
    if let (Some(cache), TaskOutcome::Succeeded(completion)) = (&cache, &result.outcome)
        && let Err(e) = cache
            .put(&result.key, &completion.content, ttl, &completion.model)
            .await
    {
        warn!(key = %result.key, error = %e, "cache write-through failed; returning live result");
    }
    result.outcome
}

/// Whether a joined flight failed only because of the leader's own limits.
fn inherited_failure(outcome: &TaskOutcome, timeout: Duration, cancel: &CancellationToken) -> bool {
    match outcome {
        TaskOutcome::Cancelled => !cancel.is_cancelled(),
        TaskOutcome::TimedOut(budget) => *budget < timeout,
        TaskOutcome::Succeeded(_) | TaskOutcome::Failed(_) => false,
    }
}

/// Removes the leader's flight entry however the leader exits, unless a
/// newer flight has already taken its place.
struct FlightCleanup {
    flights: FlightMap,
    key: String,
    flight: Flight,
}

impl Drop for FlightCleanup {
    fn drop(&mut self) {
        let mut flights = self
            .flights
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if flights
            .get(&self.key)
            .is_some_and(|current| Shared::ptr_eq(current, &self.flight))
        {
            flights.remove(&self.key);
        }
    }
}

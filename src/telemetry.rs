//! Telemetry metric name constants.
//!
//! Centralised metric names for huginn operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `huginn_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `backend`: inference backend name
//! - `status`: task outcome ("ok", "failed", "timeout", "cancelled")
//! - `reason`: why a cache record was removed ("expired", "corrupt", "lru", "invalidated")
//! - `source`: where a response came from ("cache", "live", "coalesced")

/// Cache lookups that returned verified content.
pub const CACHE_HITS_TOTAL: &str = "huginn_cache_hits_total";

/// Cache lookups that found nothing usable (absent or expired).
pub const CACHE_MISSES_TOTAL: &str = "huginn_cache_misses_total";

/// Records that failed integrity verification and were purged.
///
/// Any non-zero value deserves operator attention: it means stored content
/// or tags changed outside this process, or the secret was rotated.
pub const CACHE_CORRUPT_TOTAL: &str = "huginn_cache_corrupt_total";

/// Records removed from the store.
///
/// Labels: `reason` ("expired" | "corrupt" | "lru" | "invalidated").
pub const CACHE_REMOVALS_TOTAL: &str = "huginn_cache_removals_total";

/// Store operations that failed (cache running in degraded mode).
pub const CACHE_STORAGE_ERRORS_TOTAL: &str = "huginn_cache_storage_errors_total";

/// Bytes currently accounted to live records.
pub const CACHE_SIZE_BYTES: &str = "huginn_cache_size_bytes";

/// Tasks that reached a terminal state in the dispatcher.
///
/// Labels: `backend`, `status`.
pub const DISPATCH_TOTAL: &str = "huginn_dispatch_total";

/// Wall time of dispatched external calls in seconds (retries included).
///
/// Labels: `backend`.
pub const DISPATCH_DURATION_SECONDS: &str = "huginn_dispatch_duration_seconds";

/// External calls currently holding a concurrency slot.
pub const DISPATCH_IN_FLIGHT: &str = "huginn_dispatch_in_flight";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `backend`.
pub const RETRIES_TOTAL: &str = "huginn_retries_total";

/// Requests answered by the orchestrator.
///
/// Labels: `source` ("cache" | "live" | "coalesced").
pub const RESPONSES_TOTAL: &str = "huginn_responses_total";

//! Concurrency-bounded dispatch to the inference backend.
//!
//! - [`InferenceBackend`]: the external service, supplied by the caller.
//! - [`Dispatcher`]: runs [`Task`]s under a semaphore and per-task timeout.
//! - [`RetryConfig`]: backoff policy for rate-limited calls.

mod dispatcher;
pub mod retry;
pub mod task;
pub mod traits;

pub use dispatcher::{DispatchConfig, DispatchStats, Dispatcher};
pub use retry::RetryConfig;
pub use task::{Task, TaskHandle, TaskId, TaskOutcome, TaskResult, TaskState};
pub use traits::InferenceBackend;

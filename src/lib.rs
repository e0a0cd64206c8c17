//! Huginn - cached, concurrency-bounded dispatch of agent requests
//!
//! Callers hand Huginn agent requests; Huginn answers each one either from
//! a persistent, integrity-checked response cache or by calling an external
//! inference service through a dispatcher that never runs more than a
//! configured number of calls at once.
//!
//! - Identical requests (same agent, normalized prompt, model and
//!   output-affecting parameters) share one cache key.
//! - Cached content is HMAC-tagged; a record that fails verification is
//!   purged and never served.
//! - Each task gets its own timeout; one failing or slow task never affects
//!   another.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use huginn::{AgentRequest, Completion, Huginn, InferenceBackend, InferenceRequest};
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl InferenceBackend for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn complete(&self, request: &InferenceRequest) -> huginn::Result<Completion> {
//!         Ok(Completion::new(request.prompt.clone(), request.model.clone()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> huginn::Result<()> {
//!     let huginn = Huginn::builder()
//!         .backend(Arc::new(Echo))
//!         .max_concurrent(4)
//!         .sqlite("/var/cache/huginn/responses.db")
//!         .integrity_secret(std::env::var("HUGINN_CACHE_SECRET").unwrap_or_default())
//!         .build()
//!         .await?;
//!
//!     let results = huginn
//!         .run_batch(vec![
//!             AgentRequest::new("summarizer", "Summarize the report.", "small-model"),
//!             AgentRequest::new("critic", "Critique the summary.", "large-model")
//!                 .param("temperature", 0.2),
//!         ])
//!         .await;
//!
//!     for result in results {
//!         println!("{} ({:?}): {}", result.key, result.source, result.outcome);
//!     }
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod fingerprint;
pub mod orchestrator;
pub mod store;
pub mod telemetry;
pub mod types;
pub mod version;

// Re-export main types at crate root
pub use cache::{CacheConfig, CacheLookup, CacheStats, IntegrityKey, ResponseCache};
pub use config::{Config, Secrets};
pub use dispatch::{
    DispatchConfig, Dispatcher, InferenceBackend, RetryConfig, Task, TaskOutcome, TaskResult,
    TaskState,
};
pub use error::{HuginnError, Result};
pub use orchestrator::{Huginn, HuginnBuilder, Orchestrator, ResponseSource, RunResult};
pub use store::{CacheStore, MemoryStore, SqliteStore, StoreError};
pub use types::{AgentRequest, CacheRecord, Completion, InferenceRequest};
pub use version::{PKG_VERSION, version_string};

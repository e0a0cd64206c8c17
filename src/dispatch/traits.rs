//! The external inference collaborator.
//!
//! Huginn never talks to a model API itself. Callers plug in an
//! [`InferenceBackend`] (an HTTP client for their provider, a local model,
//! a mock in tests) and the dispatcher drives it under its concurrency and
//! timeout budget.
//!
//! # Error contract
//!
//! - `HuginnError::RateLimited { retry_after }`: the service asked us to
//!   slow down. The dispatcher retries with backoff, honouring `retry_after`.
//! - anything else: a hard failure, reported for that task only.
//!
//! # Example
//!
//! ```ignore
//! struct Echo;
//!
//! #[async_trait]
//! impl InferenceBackend for Echo {
//!     fn name(&self) -> &str { "echo" }
//!
//!     async fn complete(&self, request: &InferenceRequest) -> Result<Completion> {
//!         Ok(Completion::new(request.prompt.clone(), &request.model))
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::Result;
use crate::types::{Completion, InferenceRequest};

/// A service that turns requests into completions.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Backend name for logging and metric labels.
    fn name(&self) -> &str;

    /// Perform one call.
    ///
    /// `request.timeout` is the budget the dispatcher enforces; the future
    /// is dropped once it elapses, so implementations need not enforce it
    /// themselves.
    async fn complete(&self, request: &InferenceRequest) -> Result<Completion>;
}


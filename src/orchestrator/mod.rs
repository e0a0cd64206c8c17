//! Orchestrator - the caller-facing entry point
//!
//! Each request is fingerprinted and probed in the [`ResponseCache`](crate::cache::ResponseCache);
//! misses go through the [`Dispatcher`](crate::dispatch::Dispatcher) and
//! successful results are written back before they are returned.

mod builder;
mod runner;

pub use builder::{Huginn, HuginnBuilder};
pub use runner::{Orchestrator, ResponseSource, RunResult};

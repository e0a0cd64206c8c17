//! Public types for the Huginn API.

mod record;
mod request;

pub use record::{CacheRecord, RecordMeta};
pub use request::{AgentRequest, Completion, InferenceRequest};

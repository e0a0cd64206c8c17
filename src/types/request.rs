//! Request and completion types exchanged with callers and backends

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::fingerprint;

/// One agent request as submitted by a caller.
///
/// `params` holds only parameters that change the model's output
/// (temperature, max tokens, stop sequences, ...). Everything in here
/// feeds the fingerprint, so transport-level knobs do not belong in it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRequest {
    pub agent: String,
    pub prompt: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
    /// Per-request override of the dispatcher's default timeout.
    #[serde(skip)]
    pub timeout: Option<Duration>,
    /// Per-request override of the cache's default TTL.
    #[serde(skip)]
    pub ttl: Option<Duration>,
}

impl AgentRequest {
    pub fn new(
        agent: impl Into<String>,
        prompt: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            agent: agent.into(),
            prompt: prompt.into(),
            model: model.into(),
            ..Self::default()
        }
    }

    pub fn param(mut self, name: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Cache key for this request. See [`fingerprint::fingerprint`].
    pub fn fingerprint(&self) -> String {
        fingerprint::fingerprint(
            &self.agent,
            &fingerprint::normalize_request_text(&self.prompt),
            &self.model,
            &self.params,
        )
    }

    /// Build the backend call for this request.
    ///
    /// The prompt is sent normalized, so two requests that share a key
    /// always send identical text.
    pub fn to_inference(&self, timeout: Duration) -> InferenceRequest {
        InferenceRequest {
            agent: self.agent.clone(),
            prompt: fingerprint::normalize_request_text(&self.prompt),
            model: self.model.clone(),
            params: self.params.clone(),
            timeout,
        }
    }
}

/// A single call to the external inference service.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceRequest {
    pub agent: String,
    pub prompt: String,
    pub model: String,
    pub params: BTreeMap<String, serde_json::Value>,
    /// Budget the dispatcher will enforce; backends may pass it to their
    /// HTTP client so the socket gives up at the same time.
    pub timeout: Duration,
}

/// Response body from the inference service (or the cache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub content: Vec<u8>,
    /// Model that produced the content.
    pub model: String,
}

impl Completion {
    pub fn new(content: impl Into<Vec<u8>>, model: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            model: model.into(),
        }
    }

    /// Content as UTF-8, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }
}

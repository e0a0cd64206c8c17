//! Huginn error types

use std::time::Duration;

use crate::store::StoreError;

/// Huginn error types
#[derive(Debug, thiserror::Error)]
pub enum HuginnError {
    // Inference backend errors
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("backend error: {0}")]
    Backend(String),

    #[error("empty response from model")]
    EmptyResponse,

    // Dispatch errors
    #[error("dispatch timed out after {0:?}")]
    Timeout(Duration),

    #[error("task cancelled before dispatch")]
    Cancelled,

    #[error("dispatch failed: {0}")]
    Dispatch(String),

    // Cache errors
    #[error("cache storage unavailable: {0}")]
    Storage(#[from] StoreError),

    // Startup errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl HuginnError {
    /// Whether retrying the same call may succeed.
    ///
    /// Only rate limiting is transient; every other backend error is a hard
    /// failure reported straight back to the task.
    pub fn is_transient(&self) -> bool {
        matches!(self, HuginnError::RateLimited { .. })
    }

    /// Backend-provided hint for how long to wait before retrying.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            HuginnError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Result type alias for Huginn operations
pub type Result<T> = std::result::Result<T, HuginnError>;

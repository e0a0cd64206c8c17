//! Tasks, their states and their results.

use std::fmt;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::types::{Completion, InferenceRequest};
use crate::{HuginnError, Result};

/// Dispatcher-assigned task identifier, unique per dispatcher.
pub type TaskId = u64;

/// One unit of work for the [`Dispatcher`](super::Dispatcher).
#[derive(Debug, Clone)]
pub struct Task {
    /// Fingerprint key of the request, carried for logging and results.
    pub key: String,
    pub request: InferenceRequest,
    /// Overrides the dispatcher's default timeout.
    pub timeout: Option<Duration>,
}

impl Task {
    pub fn new(key: impl Into<String>, request: InferenceRequest) -> Self {
        Self {
            key: key.into(),
            request,
            timeout: None,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Observable task lifecycle.
///
/// `Pending → Dispatched → {Succeeded, Failed, TimedOut, Cancelled}`;
/// `Cancelled` is only reachable from `Pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for a concurrency slot.
    Pending,
    /// The external call is in flight.
    Dispatched,
    Succeeded,
    Failed(String),
    TimedOut,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending | TaskState::Dispatched)
    }
}

/// Terminal result of a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded(Completion),
    /// The backend returned a hard error (or rate limiting outlasted retries).
    Failed(String),
    /// The call did not finish within the given budget.
    TimedOut(Duration),
    /// Cancelled before the call was dispatched.
    Cancelled,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded(_))
    }

    pub fn completion(&self) -> Option<&Completion> {
        match self {
            TaskOutcome::Succeeded(c) => Some(c),
            _ => None,
        }
    }

    /// Metric label for this outcome.
    pub fn status(&self) -> &'static str {
        match self {
            TaskOutcome::Succeeded(_) => "ok",
            TaskOutcome::Failed(_) => "failed",
            TaskOutcome::TimedOut(_) => "timeout",
            TaskOutcome::Cancelled => "cancelled",
        }
    }

    pub fn into_result(self) -> Result<Completion> {
        match self {
            TaskOutcome::Succeeded(c) => Ok(c),
            TaskOutcome::Failed(reason) => Err(HuginnError::Dispatch(reason)),
            TaskOutcome::TimedOut(after) => Err(HuginnError::Timeout(after)),
            TaskOutcome::Cancelled => Err(HuginnError::Cancelled),
        }
    }

    pub(crate) fn state(&self) -> TaskState {
        match self {
            TaskOutcome::Succeeded(_) => TaskState::Succeeded,
            TaskOutcome::Failed(reason) => TaskState::Failed(reason.clone()),
            TaskOutcome::TimedOut(_) => TaskState::TimedOut,
            TaskOutcome::Cancelled => TaskState::Cancelled,
        }
    }
}

impl fmt::Display for TaskOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskOutcome::Succeeded(c) => write!(f, "succeeded ({} bytes)", c.content.len()),
            TaskOutcome::Failed(reason) => write!(f, "failed: {reason}"),
            TaskOutcome::TimedOut(after) => write!(f, "timed out after {after:?}"),
            TaskOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// A finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub id: TaskId,
    pub key: String,
    pub outcome: TaskOutcome,
    /// Time from submission to the terminal state, queueing included.
    pub elapsed: Duration,
}

/// Handle to a submitted task.
///
/// Dropping the handle does not stop the task.
#[derive(Debug)]
pub struct TaskHandle {
    pub(crate) id: TaskId,
    pub(crate) key: String,
    pub(crate) state: watch::Receiver<TaskState>,
    pub(crate) join: JoinHandle<TaskResult>,
    pub(crate) submitted: tokio::time::Instant,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current state.
    pub fn state(&self) -> TaskState {
        self.state.borrow().clone()
    }

    /// Wait until the task leaves `state` (e.g. `Pending`). Returns the new state.
    pub async fn changed(&mut self) -> TaskState {
        // Sender dropping means the task finished; the last value is terminal.
        let _ = self.state.changed().await;
        self.state()
    }

    /// Wait for the task to finish.
    ///
    /// A panic inside the backend surfaces as `Failed` for this task only.
    pub async fn wait(self) -> TaskResult {
        match self.join.await {
            Ok(result) => result,
            Err(e) => {
                let reason = if e.is_panic() {
                    "backend panicked".to_string()
                } else {
                    "task aborted".to_string()
                };
                TaskResult {
                    id: self.id,
                    key: self.key,
                    outcome: TaskOutcome::Failed(reason),
                    elapsed: self.submitted.elapsed(),
                }
            }
        }
    }
}

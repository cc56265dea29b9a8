//! Status labels for tasks and workers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task lifecycle status.
///
/// State transitions:
/// - Queued -> Started -> Finished
/// - Queued -> Started -> Failed
/// - Queued -> Deferred -> Started -> ... (skipped by a dequeue scan first)
///
/// `NotQueued` is what queries answer for an unknown id. It is never stored on
/// a registered task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the pending sequence.
    Queued,

    /// Handed to a worker; the deferred call is executing.
    Started,

    /// The deferred call returned a value.
    Finished,

    /// The deferred call failed, panicked or timed out.
    Failed,

    /// Still pending, but the last dequeue scan found it not runnable.
    Deferred,

    #[serde(rename = "not queued")]
    NotQueued,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Finished | TaskStatus::Failed)
    }

    /// Is the task still waiting in the pending sequence?
    pub fn is_pending(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::Deferred)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Started => "started",
            TaskStatus::Finished => "finished",
            TaskStatus::Failed => "failed",
            TaskStatus::Deferred => "deferred",
            TaskStatus::NotQueued => "not queued",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Worker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Working,
    /// Marked for retirement; leaves the roster once idle.
    Stopped,
}

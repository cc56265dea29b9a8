use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{TaskId, TaskStatus, WorkerId, WorkerStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub queued: usize,
    pub deferred: usize,
    pub started: usize,
    pub finished: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub(crate) fn record(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Queued => self.queued += 1,
            TaskStatus::Deferred => self.deferred += 1,
            TaskStatus::Started => self.started += 1,
            TaskStatus::Finished => self.finished += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::NotQueued => {}
        }
    }

    pub fn total(&self) -> usize {
        self.queued + self.deferred + self.started + self.finished + self.failed
    }
}

/// Read-only view of a registered task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub function: String,
    pub tag: String,
    pub status: TaskStatus,
    pub args: Vec<Value>,
    pub timeout_secs: f64,
    pub depend: Vec<TaskId>,
    pub incompatible: Vec<String>,
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub worker: Option<WorkerId>,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub status: WorkerStatus,
    pub current_task: Option<TaskId>,
    pub completed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub counts: TaskCounts,
    /// Length of the pending sequence.
    pub pending: usize,
    pub workers: Vec<WorkerSnapshot>,
    /// A deferred-retry timer is currently outstanding.
    pub retry_armed: bool,
    /// Retry timers armed since the scheduler was created.
    pub retries_armed: u64,
}

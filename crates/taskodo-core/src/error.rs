use std::time::Duration;

use thiserror::Error;

use crate::domain::TaskId;

/// Caller-facing errors from scheduler operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("task already at the queue (task_id={0})")]
    DuplicateTaskId(TaskId),

    #[error("dependency cycle: {}", join_ids(.0))]
    DependencyCycle(Vec<TaskId>),

    #[error("task is running and cannot be cancelled (task_id={0})")]
    TaskRunning(TaskId),

    #[error("duplicate function name={0}")]
    DuplicateFunction(String),

    #[error("function not registered name={0}")]
    UnknownFunction(String),
}

/// Failure of a deferred call. Recorded on the task, never raised by the
/// scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("bad arguments: {0}")]
    BadArguments(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

fn join_ids(ids: &[TaskId]) -> String {
    ids.iter()
        .map(TaskId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

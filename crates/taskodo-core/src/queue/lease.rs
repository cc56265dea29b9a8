//! Task lease: the hand-off between the scheduler and whoever executes a
//! task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use super::{Scheduler, TaskRecord};
use crate::domain::{TaskId, WorkerId};
use crate::error::TaskError;
use crate::runtime::{TaskFn, panic_message};

/// A task handed out by the scheduler, already marked `Started`.
///
/// The holder owns the execution and must report it with `ack`, `fail` or
/// `complete`; until then the task stays `Started` and keeps blocking its
/// dependents and incompatible tasks. A lease dropped without a report fails
/// its task with "lease dropped".
pub struct TaskLease {
    scheduler: Scheduler,
    task_id: TaskId,
    worker: Option<WorkerId>,
    func: Arc<dyn TaskFn>,
    args: Vec<Value>,
    timeout: Duration,
    reported: bool,
}

impl TaskLease {
    pub(crate) fn new(scheduler: Scheduler, record: &TaskRecord, worker: Option<WorkerId>) -> Self {
        Self {
            scheduler,
            task_id: record.id.clone(),
            worker,
            func: Arc::clone(&record.func),
            args: record.args.clone(),
            timeout: record.timeout,
            reported: false,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn function_name(&self) -> &str {
        self.func.name()
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run the deferred call on its own tokio task.
    ///
    /// A panic becomes `TaskError::Panicked`. Past the timeout the call is
    /// abandoned with `TaskError::TimedOut`: async work is cancelled, blocking
    /// work keeps its thread until it returns on its own.
    pub async fn execute(&self) -> Result<Value, TaskError> {
        let func = Arc::clone(&self.func);
        let args = self.args.clone();
        let mut handle = tokio::spawn(async move { func.call(args).await });

        match tokio::time::timeout(self.timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) if e.is_panic() => Err(TaskError::Panicked(panic_message(e.into_panic()))),
            Ok(Err(e)) => Err(TaskError::failed(e.to_string())),
            Err(_) => {
                handle.abort();
                Err(TaskError::TimedOut(self.timeout))
            }
        }
    }

    /// Mark success.
    pub async fn ack(self, result: Value) {
        self.complete(Ok(result)).await;
    }

    /// Mark failure.
    pub async fn fail(self, error: TaskError) {
        self.complete(Err(error)).await;
    }

    /// Record the outcome, free the worker and wake everyone.
    pub async fn complete(mut self, outcome: Result<Value, TaskError>) {
        self.scheduler
            .complete(&self.task_id, self.worker.as_ref(), outcome)
            .await;
        self.reported = true;
    }
}

impl Drop for TaskLease {
    fn drop(&mut self) {
        if self.reported {
            return;
        }
        warn!(task_id = %self.task_id, "lease dropped without an outcome");
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(task_id = %self.task_id, "no runtime to record the dropped lease");
            return;
        };
        let scheduler = self.scheduler.clone();
        let task_id = self.task_id.clone();
        let worker = self.worker.clone();
        runtime.spawn(async move {
            scheduler
                .complete(&task_id, worker.as_ref(), Err(TaskError::failed("lease dropped")))
                .await;
        });
    }
}

impl fmt::Debug for TaskLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskLease")
            .field("task_id", &self.task_id)
            .field("worker", &self.worker)
            .field("function", &self.func.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

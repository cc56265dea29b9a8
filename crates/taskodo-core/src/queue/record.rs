//! Task record: the registry entry for one submitted task.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::domain::{TaskId, TaskRequest, TaskStatus, WorkerId};
use crate::observability::TaskSnapshot;
use crate::runtime::TaskFn;

/// Registry entry for a task.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - The pending sequence holds TaskId only.
/// - Status, result and error are written under the scheduler lock, by the
///   hand-off (Started) and by the lease that executed it (Finished/Failed).
pub struct TaskRecord {
    pub id: TaskId,
    pub func: Arc<dyn TaskFn>,
    pub args: Vec<Value>,

    /// Incompatibility category; defaults to the function name.
    pub tag: String,

    pub status: TaskStatus,
    pub timeout: Duration,

    pub result: Option<Value>,
    pub error_message: Option<String>,

    pub depend: HashSet<TaskId>,
    pub incompatible: HashSet<String>,

    /// Worker that executed (or is executing) the task.
    pub worker: Option<WorkerId>,

    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub(crate) fn new(
        id: TaskId,
        request: TaskRequest,
        default_timeout: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let tag = request
            .tag
            .unwrap_or_else(|| request.func.name().to_string());
        Self {
            id,
            func: request.func,
            args: request.args,
            tag,
            status: TaskStatus::Queued,
            timeout: request.timeout.unwrap_or(default_timeout),
            result: None,
            error_message: None,
            depend: request.depend,
            incompatible: request.incompatible,
            worker: None,
            submitted_at: now,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status == TaskStatus::Finished
    }

    pub fn is_started(&self) -> bool {
        self.status == TaskStatus::Started
    }

    pub fn is_failed(&self) -> bool {
        self.status == TaskStatus::Failed
    }

    /// Runnability against the current registry. No side effects.
    ///
    /// - every dependency must be registered and `Finished`
    /// - no `Started` task may carry a tag listed in `incompatible`
    pub fn can_run(&self, tasks: &HashMap<TaskId, TaskRecord>) -> bool {
        for dependency in &self.depend {
            match tasks.get(dependency) {
                None => {
                    debug!(task_id = %self.id, dependency = %dependency, "cannot run: dependency not registered");
                    return false;
                }
                Some(task) if !task.is_finished() => {
                    debug!(task_id = %self.id, dependency = %dependency, "cannot run: dependency not finished");
                    return false;
                }
                Some(_) => {}
            }
        }

        if !self.incompatible.is_empty()
            && let Some(running) = tasks
                .values()
                .find(|task| task.is_started() && self.incompatible.contains(&task.tag))
        {
            debug!(task_id = %self.id, conflicting = %running.id, tag = %running.tag, "cannot run: conflicting task is running");
            return false;
        }
        true
    }

    pub(crate) fn mark_started(&mut self, worker: Option<WorkerId>, now: DateTime<Utc>) {
        self.status = TaskStatus::Started;
        self.worker = worker;
        self.started_at = Some(now);
    }

    pub(crate) fn mark_finished(&mut self, result: Value, now: DateTime<Utc>) {
        self.status = TaskStatus::Finished;
        self.result = Some(result);
        self.finished_at = Some(now);
    }

    pub(crate) fn mark_failed(&mut self, message: String, now: DateTime<Utc>) {
        self.status = TaskStatus::Failed;
        self.error_message = Some(message);
        self.finished_at = Some(now);
    }

    /// Skipped by a dequeue scan. Only pending tasks change.
    pub(crate) fn mark_deferred(&mut self) {
        if self.status == TaskStatus::Queued {
            self.status = TaskStatus::Deferred;
        }
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let mut depend: Vec<TaskId> = self.depend.iter().cloned().collect();
        depend.sort();
        let mut incompatible: Vec<String> = self.incompatible.iter().cloned().collect();
        incompatible.sort();
        TaskSnapshot {
            id: self.id.clone(),
            function: self.func.name().to_string(),
            tag: self.tag.clone(),
            status: self.status,
            args: self.args.clone(),
            timeout_secs: self.timeout.as_secs_f64(),
            depend,
            incompatible,
            result: self.result.clone(),
            error_message: self.error_message.clone(),
            worker: self.worker.clone(),
            submitted_at: self.submitted_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }
}

impl fmt::Debug for TaskRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRecord")
            .field("id", &self.id)
            .field("function", &self.func.name())
            .field("tag", &self.tag)
            .field("status", &self.status)
            .field("depend", &self.depend)
            .field("incompatible", &self.incompatible)
            .finish_non_exhaustive()
    }
}

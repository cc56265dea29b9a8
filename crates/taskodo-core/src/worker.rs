//! Worker roster entries and the pull loop each worker runs.
//!
//! ワーカーは通知を待ち、実行できるタスクが尽きるまで pull して実行する。

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::domain::{TaskId, WorkerId, WorkerStatus};
use crate::observability::WorkerSnapshot;
use crate::queue::{Pull, Scheduler};

/// Roster entry for one worker.
///
/// The worker itself is a tokio task running [`run`]; the scheduler keeps
/// this slot to signal it and to report on it.
pub(crate) struct WorkerSlot {
    pub id: WorkerId,
    pub status: WorkerStatus,
    /// Set by `retire_worker`; honored the next time the worker pulls.
    pub must_die: bool,
    pub notify: Arc<Notify>,
    pub join: Option<JoinHandle<()>>,
    pub current: Option<TaskId>,
    pub completed: u64,
}

impl WorkerSlot {
    pub fn new(id: WorkerId, notify: Arc<Notify>, join: JoinHandle<()>) -> Self {
        Self {
            id,
            status: WorkerStatus::Idle,
            must_die: false,
            notify,
            join: Some(join),
            current: None,
            completed: 0,
        }
    }

    pub fn start(&mut self, task: TaskId) {
        self.status = WorkerStatus::Working;
        self.current = Some(task);
    }

    pub fn finish(&mut self) {
        self.status = WorkerStatus::Idle;
        self.current = None;
        self.completed += 1;
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        let status = if self.must_die {
            WorkerStatus::Stopped
        } else {
            self.status
        };
        WorkerSnapshot {
            id: self.id.clone(),
            status,
            current_task: self.current.clone(),
            completed: self.completed,
        }
    }
}

/// Worker loop: wait for a notify, then pull and execute until the
/// scheduler has nothing runnable, then wait again.
///
/// A notify sent while the worker is busy leaves a permit behind, so the
/// next wait returns immediately and no wake-up is lost.
pub(crate) async fn run(scheduler: Scheduler, id: WorkerId, notify: Arc<Notify>) {
    debug!(worker_id = %id, "worker started");
    loop {
        notify.notified().await;

        loop {
            match scheduler.pull(Some(&id)).await {
                Pull::Retire => {
                    info!(worker_id = %id, "worker retired");
                    return;
                }
                Pull::Idle => break,
                Pull::Task(lease) => {
                    debug!(worker_id = %id, task_id = %lease.task_id(), "worker starts working");
                    let outcome = lease.execute().await;
                    if let Err(e) = &outcome {
                        warn!(worker_id = %id, task_id = %lease.task_id(), error = %e, "task failed");
                    }
                    lease.complete(outcome).await;
                    debug!(worker_id = %id, "worker stops working");
                }
            }
        }
    }
}

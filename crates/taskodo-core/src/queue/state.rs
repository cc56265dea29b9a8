//! Scheduler state guarded by the single scheduler lock.

use std::collections::{HashMap, VecDeque};

use tokio::task::JoinHandle;
use tracing::debug;

use super::TaskRecord;
use super::dependency::DependencyGraph;
use crate::domain::{TaskId, WorkerId};
use crate::observability::{SchedulerStats, TaskCounts};
use crate::worker::WorkerSlot;

/// Outcome of one runnability search over the pending sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Dequeue {
    /// Removed from pending; the caller hands it out.
    Ready(TaskId),
    /// Pending is non-empty but nothing in it is runnable.
    Blocked,
    Empty,
}

/// The one outstanding deferred-retry timer.
pub(crate) struct RetryTimer {
    pub generation: u64,
    pub handle: JoinHandle<()>,
}

#[derive(Default)]
pub(crate) struct SchedulerState {
    /// Pending sequence. New work is pushed at the front; the back is the
    /// oldest end and the dequeue candidate.
    pub pending: VecDeque<TaskId>,

    /// All registered tasks (superset of pending).
    pub tasks: HashMap<TaskId, TaskRecord>,

    pub workers: Vec<WorkerSlot>,

    pub graph: DependencyGraph,

    pub retry: Option<RetryTimer>,

    /// Consecutive retry arms with no progress in between.
    pub retry_streak: u32,

    /// Retry timers armed so far; doubles as the timer generation.
    pub retries_armed: u64,
}

impl SchedulerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record and push it at the new-work end.
    pub fn insert(&mut self, record: TaskRecord) {
        self.graph.add_task(&record.id, &record.depend);
        self.pending.push_front(record.id.clone());
        self.tasks.insert(record.id.clone(), record);
    }

    /// Dependency-aware search for the next task.
    ///
    /// The candidate is the oldest entry. When it is not runnable the rest of
    /// the sequence is scanned backward and the first runnable entry is
    /// swapped into the candidate slot (one swap, not a sort). When nothing is
    /// runnable the sequence is rotated by one so the next attempt starts
    /// from a different arrangement. O(n) worst case per call.
    pub fn dequeue(&mut self) -> Dequeue {
        let Some(last) = self.pending.len().checked_sub(1) else {
            return Dequeue::Empty;
        };

        let mut skipped = Vec::new();
        let mut found = None;
        for pos in (0..=last).rev() {
            let id = &self.pending[pos];
            match self.tasks.get(id) {
                Some(record) if record.can_run(&self.tasks) => {
                    found = Some(pos);
                    break;
                }
                _ => skipped.push(id.clone()),
            }
        }

        for id in &skipped {
            if let Some(record) = self.tasks.get_mut(id) {
                record.mark_deferred();
            }
        }

        match found {
            Some(pos) => {
                if pos != last {
                    debug!(from = pos, to = last, "reordering pending tasks");
                    self.pending.swap(pos, last);
                }
                match self.pending.pop_back() {
                    Some(id) => {
                        debug!(task_id = %id, pending = self.pending.len(), "task dequeued");
                        Dequeue::Ready(id)
                    }
                    None => Dequeue::Empty,
                }
            }
            None => {
                self.pending.rotate_right(1);
                debug!(pending = self.pending.len(), "no runnable task in pending sequence");
                Dequeue::Blocked
            }
        }
    }

    /// Remove a task from pending, registry and graph.
    pub fn remove(&mut self, id: &TaskId) -> Option<TaskRecord> {
        let record = self.tasks.remove(id)?;
        self.pending.retain(|pending| pending != id);
        self.graph.remove_task(id);
        Some(record)
    }

    pub fn worker_mut(&mut self, id: &WorkerId) -> Option<&mut WorkerSlot> {
        self.workers.iter_mut().find(|w| &w.id == id)
    }

    pub fn remove_worker(&mut self, id: &WorkerId) -> Option<WorkerSlot> {
        let pos = self.workers.iter().position(|w| &w.id == id)?;
        Some(self.workers.remove(pos))
    }

    pub fn counts(&self) -> TaskCounts {
        let mut counts = TaskCounts::default();
        for record in self.tasks.values() {
            counts.record(record.status);
        }
        counts
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            counts: self.counts(),
            pending: self.pending.len(),
            workers: self.workers.iter().map(WorkerSlot::snapshot).collect(),
            retry_armed: self.retry.is_some(),
            retries_armed: self.retries_armed,
        }
    }
}

//! Queue module: the scheduler, its state, the dequeue algorithm and the
//! deferred-retry timer.
//!
//! Design intent:
//! - One lock (`tokio::sync::Mutex`) guards pending, registry, roster, retry
//!   slot and dependency graph. Every operation takes it for its whole
//!   bookkeeping and releases it before notifying workers.
//! - Workers pull (`dequeue`) when notified; the scheduler never pushes tasks.
//! - A dequeue that finds nothing runnable never waits: it arms one retry
//!   timer whose expiry is just another notify broadcast.

mod dependency;
mod lease;
mod record;
mod retry;
mod state;

pub use dependency::DependencyGraph;
pub use lease::TaskLease;
pub use record::TaskRecord;
pub use retry::RetryPolicy;

use std::sync::{Arc, Weak};

use serde_json::Value;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use self::state::{Dequeue, RetryTimer, SchedulerState};
use crate::config::SchedulerConfig;
use crate::domain::{TaskId, TaskRequest, TaskStatus, WorkerId};
use crate::error::{SchedulerError, TaskError};
use crate::observability::{SchedulerStats, TaskSnapshot, WorkerSnapshot};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::worker::{self, WorkerSlot};

/// Answer of `fetch_result`.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedResult {
    /// Unknown id (never submitted, cancelled or already consumed).
    NotQueued,
    /// Registered but not terminal yet.
    Pending(TaskStatus),
    Finished(Value),
    Failed(String),
}

/// What a pull hands back to a worker.
pub(crate) enum Pull {
    Task(TaskLease),
    Idle,
    Retire,
}

struct Inner {
    state: Mutex<SchedulerState>,
    config: SchedulerConfig,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

/// Shared handle to one scheduler instance. Cloning is cheap; all clones
/// drive the same registry and roster.
///
/// Construct it explicitly (there is no global instance), start workers with
/// `start` or `add_workers`, and stop them with `shutdown`.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_ports(
            config,
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    pub fn with_ports(
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        info!(?config, "creating scheduler");
        if let Err(e) = config.validate() {
            warn!(error = %e, "scheduler config is invalid; retry delays are clamped");
        }
        let retry_policy = RetryPolicy::from_config(&config);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(SchedulerState::new()),
                config,
                retry_policy,
                clock,
                ids,
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Start the configured number of workers.
    pub async fn start(&self) -> Vec<WorkerId> {
        self.add_workers(self.inner.config.workers).await
    }

    // ------------------------------------------------------------------
    // Submission and dequeue
    // ------------------------------------------------------------------

    /// Register a task and wake all workers.
    ///
    /// A caller-chosen id already in the registry, or dependencies that would
    /// close a cycle, are rejected and leave the scheduler untouched.
    pub async fn submit(&self, request: TaskRequest) -> Result<TaskId, SchedulerError> {
        let id = {
            let mut state = self.inner.state.lock().await;

            let id = match request.id.clone() {
                Some(id) if state.tasks.contains_key(&id) => {
                    warn!(task_id = %id, "rejecting duplicate task id");
                    return Err(SchedulerError::DuplicateTaskId(id));
                }
                Some(id) => id,
                None => loop {
                    let id = self.inner.ids.generate_task_id();
                    if !state.tasks.contains_key(&id) {
                        break id;
                    }
                },
            };

            if !request.depend.is_empty() {
                state.graph.add_task(&id, &request.depend);
                if let Some(cycle) = state.graph.cycle_through(&id) {
                    state.graph.remove_task(&id);
                    warn!(task_id = %id, "rejecting task that closes a dependency cycle");
                    return Err(SchedulerError::DependencyCycle(cycle));
                }
            }

            let record = TaskRecord::new(
                id.clone(),
                request,
                self.inner.config.default_timeout(),
                self.inner.clock.now(),
            );
            state.insert(record);
            state.retry_streak = 0;
            debug!(task_id = %id, pending = state.pending.len(), "new task added to queue");
            id
        };

        self.notify_all().await;
        Ok(id)
    }

    /// Hand out the next runnable task, or None.
    ///
    /// Workers call this through their pull loop; calling it directly makes
    /// the caller responsible for reporting the lease.
    pub async fn dequeue_next(&self) -> Option<TaskLease> {
        match self.pull(None).await {
            Pull::Task(lease) => Some(lease),
            Pull::Idle | Pull::Retire => None,
        }
    }

    pub(crate) async fn pull(&self, worker: Option<&WorkerId>) -> Pull {
        let mut state = self.inner.state.lock().await;

        if let Some(worker_id) = worker {
            match state.worker_mut(worker_id).map(|slot| slot.must_die) {
                None => return Pull::Retire,
                Some(true) => {
                    state.remove_worker(worker_id);
                    return Pull::Retire;
                }
                Some(false) => {}
            }
        }

        match state.dequeue() {
            Dequeue::Ready(task_id) => {
                state.retry_streak = 0;
                let now = self.inner.clock.now();
                let Some(record) = state.tasks.get_mut(&task_id) else {
                    return Pull::Idle;
                };
                record.mark_started(worker.cloned(), now);
                let lease = TaskLease::new(self.clone(), record, worker.cloned());
                if let Some(worker_id) = worker
                    && let Some(slot) = state.worker_mut(worker_id)
                {
                    slot.start(task_id);
                }
                Pull::Task(lease)
            }
            Dequeue::Blocked => {
                self.arm_retry(&mut state);
                Pull::Idle
            }
            Dequeue::Empty => Pull::Idle,
        }
    }

    /// Record a lease outcome, then wake all workers: a finished task can
    /// unblock dependents, a finished or failed one releases its tag.
    ///
    /// Only a `Started` task takes an outcome; a second report for the same
    /// lease is ignored.
    pub(crate) async fn complete(
        &self,
        task_id: &TaskId,
        worker: Option<&WorkerId>,
        outcome: Result<Value, TaskError>,
    ) {
        {
            let mut state = self.inner.state.lock().await;
            let now = self.inner.clock.now();
            match state.tasks.get_mut(task_id) {
                Some(record) if record.is_started() => match outcome {
                    Ok(result) => {
                        record.mark_finished(result, now);
                        debug!(task_id = %task_id, "task finished");
                    }
                    Err(e) => record.mark_failed(e.to_string(), now),
                },
                Some(record) => {
                    debug!(task_id = %task_id, status = %record.status, "task already has an outcome");
                    return;
                }
                None => warn!(task_id = %task_id, "completed task is no longer registered"),
            }
            // a terminal task waits for nothing
            state.graph.remove_task(task_id);
            if let Some(worker_id) = worker
                && let Some(slot) = state.worker_mut(worker_id)
            {
                slot.finish();
            }
            state.retry_streak = 0;
        }
        self.notify_all().await;
    }

    // ------------------------------------------------------------------
    // Notify and deferred retry
    // ------------------------------------------------------------------

    /// Cancel any outstanding retry timer, then signal every worker.
    pub async fn notify_all(&self) {
        let notifiers: Vec<Arc<Notify>> = {
            let mut state = self.inner.state.lock().await;
            if let Some(timer) = state.retry.take() {
                timer.handle.abort();
                debug!(generation = timer.generation, "retry timer cancelled");
            }
            state.workers.iter().map(|w| Arc::clone(&w.notify)).collect()
        };
        debug!(workers = notifiers.len(), "notifying workers");
        for notify in notifiers {
            notify.notify_one();
        }
    }

    /// Arm the retry timer unless one is already outstanding.
    fn arm_retry(&self, state: &mut SchedulerState) {
        if state.retry.is_some() {
            return;
        }
        state.retry_streak = state.retry_streak.saturating_add(1);
        state.retries_armed += 1;
        let generation = state.retries_armed;
        let delay = self.inner.retry_policy.next_delay(state.retry_streak);

        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = inner.upgrade() {
                Scheduler { inner }.fire_retry(generation).await;
            }
        });
        state.retry = Some(RetryTimer { generation, handle });
        debug!(?delay, generation, "cannot find runnable tasks, waiting for next try");
    }

    /// Timer expiry: clear our own slot (a newer timer is left alone) and
    /// broadcast.
    async fn fire_retry(&self, generation: u64) {
        let fired = {
            let mut state = self.inner.state.lock().await;
            match &state.retry {
                Some(timer) if timer.generation == generation => {
                    state.retry = None;
                    true
                }
                _ => false,
            }
        };
        if fired {
            debug!(generation, "retry timer fired");
            self.notify_all().await;
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub async fn status(&self, id: &TaskId) -> TaskStatus {
        let state = self.inner.state.lock().await;
        state
            .tasks
            .get(id)
            .map_or(TaskStatus::NotQueued, |record| record.status)
    }

    /// Stored result of a task. With `consume`, a terminal task is removed
    /// from the registry after its result is read.
    pub async fn fetch_result(&self, id: &TaskId, consume: bool) -> FetchedResult {
        let mut state = self.inner.state.lock().await;
        let Some(record) = state.tasks.get(id) else {
            return FetchedResult::NotQueued;
        };

        let fetched = match record.status {
            TaskStatus::Finished => {
                FetchedResult::Finished(record.result.clone().unwrap_or(Value::Null))
            }
            TaskStatus::Failed => {
                FetchedResult::Failed(record.error_message.clone().unwrap_or_default())
            }
            status => return FetchedResult::Pending(status),
        };

        if consume {
            debug!(task_id = %id, "removing task");
            let dependents = state.graph.dependents(id);
            if !dependents.is_empty() {
                warn!(task_id = %id, ?dependents, "consumed task still has dependents; they can no longer run");
            }
            state.remove(id);
        }
        fetched
    }

    pub async fn error_message(&self, id: &TaskId) -> Option<String> {
        let state = self.inner.state.lock().await;
        state.tasks.get(id).and_then(|r| r.error_message.clone())
    }

    pub async fn task(&self, id: &TaskId) -> Option<TaskSnapshot> {
        let state = self.inner.state.lock().await;
        state.tasks.get(id).map(TaskRecord::snapshot)
    }

    pub async fn stats(&self) -> SchedulerStats {
        self.inner.state.lock().await.stats()
    }

    pub async fn workers(&self) -> Vec<WorkerSnapshot> {
        let state = self.inner.state.lock().await;
        state.workers.iter().map(WorkerSlot::snapshot).collect()
    }

    /// Remove a task that has not started.
    ///
    /// Returns `Ok(false)` for an unknown id. A `Started` task is refused and
    /// keeps running.
    pub async fn cancel(&self, id: &TaskId) -> Result<bool, SchedulerError> {
        let mut state = self.inner.state.lock().await;
        match state.tasks.get(id) {
            None => Ok(false),
            Some(record) if record.is_started() => Err(SchedulerError::TaskRunning(id.clone())),
            Some(_) => {
                state.remove(id);
                info!(task_id = %id, "task cancelled");
                Ok(true)
            }
        }
    }

    // ------------------------------------------------------------------
    // Worker roster
    // ------------------------------------------------------------------

    pub async fn add_workers(&self, n: usize) -> Vec<WorkerId> {
        let mut ids = Vec::with_capacity(n);
        {
            let mut state = self.inner.state.lock().await;
            for _ in 0..n {
                let id = loop {
                    let id = self.inner.ids.generate_worker_id();
                    if state.workers.iter().all(|w| w.id != id) {
                        break id;
                    }
                };
                let notify = Arc::new(Notify::new());
                let join = tokio::spawn(worker::run(self.clone(), id.clone(), Arc::clone(&notify)));
                state.workers.push(WorkerSlot::new(id.clone(), notify, join));
                ids.push(id);
            }
            info!(added = n, total = state.workers.len(), "workers started");
        }
        self.notify_all().await;
        ids
    }

    /// Mark a worker for graceful retirement; with no id, the first worker
    /// not already retiring. The worker leaves the roster the next time it is
    /// idle and notified.
    pub async fn retire_worker(&self, id: Option<&WorkerId>) -> Option<WorkerId> {
        let retired = {
            let mut state = self.inner.state.lock().await;
            let slot = match id {
                Some(id) => state.worker_mut(id),
                None => state.workers.iter_mut().find(|w| !w.must_die),
            };
            match slot {
                Some(slot) => {
                    slot.must_die = true;
                    Some(slot.id.clone())
                }
                None => {
                    if id.is_none() {
                        info!("all workers are already retiring");
                    }
                    None
                }
            }
        };
        self.notify_all().await;
        retired
    }

    /// Retire every worker and wait for them to leave.
    ///
    /// Workers finish the task they are executing first; a task that never
    /// returns keeps its worker, and this call, waiting.
    pub async fn shutdown(&self) {
        let joins = {
            let mut state = self.inner.state.lock().await;
            for slot in &mut state.workers {
                slot.must_die = true;
            }
            state
                .workers
                .iter_mut()
                .filter_map(|w| w.join.take())
                .collect::<Vec<_>>()
        };
        info!(workers = joins.len(), "scheduler shutdown requested");
        self.notify_all().await;
        for join in joins {
            if let Err(e) = join.await {
                warn!(error = %e, "worker ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::domain::WorkerStatus;
    use crate::runtime::{AsyncFnTask, FnTask, TaskFn};

    fn config(retry_delay_ms: u64) -> SchedulerConfig {
        SchedulerConfig {
            workers: 2,
            retry_delay_ms,
            ..SchedulerConfig::default()
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(config(10_000))
    }

    /// Returns its first argument.
    fn echo(name: &str) -> Arc<dyn TaskFn> {
        Arc::new(AsyncFnTask::new(name, |args: Vec<Value>| async move {
            Ok::<_, TaskError>(args.first().cloned().unwrap_or(Value::Null))
        }))
    }

    /// Sleeps for its first argument, in milliseconds.
    fn sleeper(name: &str) -> Arc<dyn TaskFn> {
        Arc::new(AsyncFnTask::new(name, |args: Vec<Value>| async move {
            let ms = args.first().and_then(Value::as_u64).unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok::<_, TaskError>(json!(ms))
        }))
    }

    async fn wait_terminal(scheduler: &Scheduler, id: &TaskId) -> TaskStatus {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let status = scheduler.status(id).await;
                if status.is_terminal() {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("task did not reach a terminal status")
    }

    #[tokio::test]
    async fn submit_generates_prefixed_id() {
        let scheduler = scheduler();
        let id = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]))
            .await
            .unwrap();

        assert!(id.as_str().starts_with("task-"));
        assert_eq!(scheduler.status(&id).await, TaskStatus::Queued);
        assert_eq!(scheduler.stats().await.pending, 1);
    }

    #[tokio::test]
    async fn snapshot_uses_injected_clock() {
        use crate::ports::FixedClock;
        use chrono::{TimeZone, Utc};

        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = FixedClock::new(at);
        let scheduler = Scheduler::with_ports(
            config(10_000),
            Arc::new(clock),
            Arc::new(UlidGenerator::new(clock)),
        );

        let id = scheduler
            .submit(
                TaskRequest::new(echo("foo"), vec![json!(1)])
                    .with_timeout(Duration::from_secs(3))
                    .depends_on(["x"])
                    .incompatible_with(["bar"]),
            )
            .await
            .unwrap();

        let snapshot = scheduler.task(&id).await.unwrap();
        assert_eq!(snapshot.submitted_at, at);
        assert_eq!(snapshot.tag, "foo");
        assert_eq!(snapshot.timeout_secs, 3.0);
        assert_eq!(snapshot.depend, vec![TaskId::from("x")]);
        assert_eq!(snapshot.incompatible, vec!["bar".to_string()]);
        assert!(snapshot.started_at.is_none());
        assert!(scheduler.task(&"missing".into()).await.is_none());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_without_side_effects() {
        let scheduler = scheduler();
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![json!(1)]).with_id("Task 1"))
            .await
            .unwrap();

        let err = scheduler
            .submit(TaskRequest::new(echo("bar"), vec![json!(2)]).with_id("Task 1"))
            .await
            .unwrap_err();

        assert_eq!(err, SchedulerError::DuplicateTaskId("Task 1".into()));
        let stats = scheduler.stats().await;
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.counts.total(), 1);
        let snapshot = scheduler.task(&"Task 1".into()).await.unwrap();
        assert_eq!(snapshot.function, "foo");
    }

    #[tokio::test]
    async fn dependency_gates_until_finished() {
        let scheduler = scheduler();
        let a = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("a"))
            .await
            .unwrap();
        let b = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("b").depends_on(["a"]))
            .await
            .unwrap();

        let lease = scheduler.dequeue_next().await.unwrap();
        assert_eq!(lease.task_id(), &a);
        assert_eq!(scheduler.status(&a).await, TaskStatus::Started);

        assert!(scheduler.dequeue_next().await.is_none());
        assert_eq!(scheduler.status(&b).await, TaskStatus::Deferred);

        lease.ack(json!("done")).await;
        let lease = scheduler.dequeue_next().await.unwrap();
        assert_eq!(lease.task_id(), &b);
    }

    #[tokio::test]
    async fn failed_dependency_blocks_forever() {
        let scheduler = scheduler();
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("a"))
            .await
            .unwrap();
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("b").depends_on(["a"]))
            .await
            .unwrap();

        let lease = scheduler.dequeue_next().await.unwrap();
        lease.fail(TaskError::failed("nope")).await;

        assert!(scheduler.dequeue_next().await.is_none());
        assert!(scheduler.dequeue_next().await.is_none());
        assert_eq!(scheduler.status(&"b".into()).await, TaskStatus::Deferred);
    }

    #[tokio::test]
    async fn incompatible_task_waits_for_running_tag() {
        let scheduler = scheduler();
        let x = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("x"))
            .await
            .unwrap();
        let y = scheduler
            .submit(
                TaskRequest::new(echo("bar"), vec![])
                    .with_id("y")
                    .incompatible_with(["foo"]),
            )
            .await
            .unwrap();

        let lease = scheduler.dequeue_next().await.unwrap();
        assert_eq!(lease.task_id(), &x);
        assert!(scheduler.dequeue_next().await.is_none());
        assert_eq!(scheduler.status(&y).await, TaskStatus::Deferred);

        lease.ack(Value::Null).await;
        let lease = scheduler.dequeue_next().await.unwrap();
        assert_eq!(lease.task_id(), &y);
    }

    #[tokio::test]
    async fn runnable_task_overtakes_blocked_candidate() {
        let scheduler = scheduler();
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("blocked").depends_on(["ghost"]))
            .await
            .unwrap();
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("x"))
            .await
            .unwrap();

        let lease = scheduler.dequeue_next().await.unwrap();
        assert_eq!(lease.task_id().as_str(), "x");
        assert_eq!(scheduler.status(&"blocked".into()).await, TaskStatus::Deferred);
        assert!(!scheduler.stats().await.retry_armed);
    }

    #[tokio::test]
    async fn fetch_result_consume_removes_task() {
        let scheduler = scheduler();
        let id = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![json!("ok")]))
            .await
            .unwrap();

        assert_eq!(
            scheduler.fetch_result(&id, true).await,
            FetchedResult::Pending(TaskStatus::Queued)
        );

        let lease = scheduler.dequeue_next().await.unwrap();
        let outcome = lease.execute().await;
        lease.complete(outcome).await;

        assert_eq!(
            scheduler.fetch_result(&id, false).await,
            FetchedResult::Finished(json!("ok"))
        );
        assert_eq!(
            scheduler.fetch_result(&id, true).await,
            FetchedResult::Finished(json!("ok"))
        );
        assert_eq!(scheduler.fetch_result(&id, true).await, FetchedResult::NotQueued);
        assert_eq!(scheduler.status(&id).await, TaskStatus::NotQueued);
    }

    #[tokio::test]
    async fn unsatisfiable_dependency_arms_a_single_timer() {
        let scheduler = scheduler();
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).depends_on(["never"]))
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(scheduler.dequeue_next().await.is_none());
        }

        let stats = scheduler.stats().await;
        assert!(stats.retry_armed);
        assert_eq!(stats.retries_armed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_timer_clears_its_slot_when_it_fires() {
        let scheduler = Scheduler::new(config(10));
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).depends_on(["never"]))
            .await
            .unwrap();

        assert!(scheduler.dequeue_next().await.is_none());
        assert!(scheduler.stats().await.retry_armed);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!scheduler.stats().await.retry_armed);

        assert!(scheduler.dequeue_next().await.is_none());
        let stats = scheduler.stats().await;
        assert!(stats.retry_armed);
        assert_eq!(stats.retries_armed, 2);
    }

    #[tokio::test]
    async fn submit_cancels_outstanding_timer() {
        let scheduler = scheduler();
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).depends_on(["never"]))
            .await
            .unwrap();
        assert!(scheduler.dequeue_next().await.is_none());
        assert!(scheduler.stats().await.retry_armed);

        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]))
            .await
            .unwrap();
        assert!(!scheduler.stats().await.retry_armed);
    }

    #[tokio::test]
    async fn dependency_cycles_are_rejected() {
        let scheduler = scheduler();
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("a").depends_on(["b"]))
            .await
            .unwrap();

        let err = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("b").depends_on(["a"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DependencyCycle(_)));
        assert_eq!(scheduler.status(&"b".into()).await, TaskStatus::NotQueued);

        let err = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("c").depends_on(["c"]))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DependencyCycle(_)));

        // the rejected edge is gone, so "b" can still be submitted plainly
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("b"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn cancel_only_removes_tasks_not_started() {
        let scheduler = scheduler();
        let first = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]))
            .await
            .unwrap();
        let second = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]))
            .await
            .unwrap();

        let lease = scheduler.dequeue_next().await.unwrap();
        assert_eq!(lease.task_id(), &first);

        assert_eq!(
            scheduler.cancel(&first).await,
            Err(SchedulerError::TaskRunning(first.clone()))
        );
        assert_eq!(scheduler.cancel(&second).await, Ok(true));
        assert_eq!(scheduler.cancel(&second).await, Ok(false));
        assert_eq!(scheduler.status(&second).await, TaskStatus::NotQueued);

        lease.ack(Value::Null).await;
        assert!(scheduler.dequeue_next().await.is_none());
    }

    #[tokio::test]
    async fn workers_run_every_task() {
        let scheduler = Scheduler::new(config(50));
        scheduler.start().await;

        let mut ids = Vec::new();
        for ms in [30, 10, 20] {
            let id = scheduler
                .submit(TaskRequest::new(sleeper("foo"), vec![json!(ms)]))
                .await
                .unwrap();
            ids.push(id);
        }

        for id in &ids {
            assert_eq!(wait_terminal(&scheduler, id).await, TaskStatus::Finished);
        }
        assert_eq!(
            scheduler.fetch_result(&ids[1], false).await,
            FetchedResult::Finished(json!(10))
        );

        let completed: u64 = scheduler.workers().await.iter().map(|w| w.completed).sum();
        assert_eq!(completed, 3);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn dependency_and_incompatibility_order_execution() {
        let log = Arc::new(StdMutex::new(Vec::<String>::new()));
        let recorder: Arc<dyn TaskFn> = {
            let log = Arc::clone(&log);
            Arc::new(AsyncFnTask::new("step", move |args: Vec<Value>| {
                let log = Arc::clone(&log);
                async move {
                    let name = args[0].as_str().unwrap_or_default().to_string();
                    let ms = args[1].as_u64().unwrap_or(0);
                    log.lock().unwrap().push(format!("{name}:start"));
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    log.lock().unwrap().push(format!("{name}:end"));
                    Ok::<_, TaskError>(Value::Null)
                }
            }))
        };

        let scheduler = Scheduler::new(config(20));
        scheduler.start().await;

        let a = scheduler
            .submit(
                TaskRequest::new(Arc::clone(&recorder), vec![json!("A"), json!(60)])
                    .with_id("A")
                    .with_tag("heavy"),
            )
            .await
            .unwrap();
        let b = scheduler
            .submit(
                TaskRequest::new(Arc::clone(&recorder), vec![json!("B"), json!(0)])
                    .with_id("B")
                    .depends_on(["A"]),
            )
            .await
            .unwrap();
        let c = scheduler
            .submit(
                TaskRequest::new(Arc::clone(&recorder), vec![json!("C"), json!(0)])
                    .with_id("C")
                    .incompatible_with(["heavy"]),
            )
            .await
            .unwrap();

        for id in [&a, &b, &c] {
            assert_eq!(wait_terminal(&scheduler, id).await, TaskStatus::Finished);
        }

        let log = log.lock().unwrap().clone();
        let pos = |entry: &str| log.iter().position(|e| e == entry).unwrap();
        assert_eq!(log[0], "A:start");
        assert!(pos("A:end") < pos("B:start"));
        assert!(pos("A:end") < pos("C:start"));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn timed_out_task_fails() {
        let scheduler = Scheduler::new(config(50));
        scheduler.add_workers(1).await;

        let id = scheduler
            .submit(
                TaskRequest::new(sleeper("slow"), vec![json!(5_000)])
                    .with_timeout(Duration::from_millis(20)),
            )
            .await
            .unwrap();

        assert_eq!(wait_terminal(&scheduler, &id).await, TaskStatus::Failed);
        let message = scheduler.error_message(&id).await.unwrap();
        assert!(message.contains("timed out"), "{message}");
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn panicking_task_fails_and_worker_survives() {
        let scheduler = Scheduler::new(config(50));
        scheduler.add_workers(1).await;

        let boom: Arc<dyn TaskFn> = Arc::new(FnTask::new(
            "boom",
            |_args: Vec<Value>| -> Result<Value, TaskError> { panic!("boom") },
        ));
        let bad = scheduler
            .submit(TaskRequest::new(boom, vec![]))
            .await
            .unwrap();
        assert_eq!(wait_terminal(&scheduler, &bad).await, TaskStatus::Failed);
        assert_eq!(
            scheduler.fetch_result(&bad, false).await,
            FetchedResult::Failed("panicked: boom".to_string())
        );

        let good = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![json!(7)]))
            .await
            .unwrap();
        assert_eq!(wait_terminal(&scheduler, &good).await, TaskStatus::Finished);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn retired_worker_leaves_roster() {
        let scheduler = scheduler();
        let ids = scheduler.start().await;
        assert_eq!(ids.len(), 2);

        let retired = scheduler.retire_worker(None).await.unwrap();
        assert_eq!(retired, ids[0]);

        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.workers().await.len() != 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker did not retire");

        let remaining = scheduler.workers().await;
        assert_eq!(remaining[0].id, ids[1]);
        assert!(scheduler.retire_worker(Some(&retired)).await.is_none());
    }

    #[tokio::test]
    async fn retiring_a_busy_worker_lets_its_task_finish() {
        let scheduler = Scheduler::new(config(50));
        let ids = scheduler.add_workers(1).await;
        let worker_id = ids[0].clone();

        let id = scheduler
            .submit(TaskRequest::new(sleeper("slow"), vec![json!(100)]))
            .await
            .unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.status(&id).await != TaskStatus::Started {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("task was not started");

        assert_eq!(scheduler.retire_worker(Some(&worker_id)).await, Some(worker_id.clone()));
        let roster = scheduler.workers().await;
        assert_eq!(roster.len(), 1);
        assert_eq!(roster[0].status, WorkerStatus::Stopped);
        assert_eq!(roster[0].current_task.as_ref(), Some(&id));

        assert_eq!(wait_terminal(&scheduler, &id).await, TaskStatus::Finished);
        let snapshot = scheduler.task(&id).await.unwrap();
        assert_eq!(snapshot.worker, Some(worker_id));
        assert_eq!(snapshot.result, Some(json!(100)));

        tokio::time::timeout(Duration::from_secs(5), async {
            while !scheduler.workers().await.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("worker did not retire");
        assert_eq!(scheduler.stats().await.counts.finished, 1);
    }

    #[tokio::test]
    async fn reused_id_ignores_edges_of_finished_tasks() {
        let scheduler = scheduler();
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("b"))
            .await
            .unwrap();
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("a").depends_on(["b"]))
            .await
            .unwrap();

        for expected in ["b", "a"] {
            let lease = scheduler.dequeue_next().await.unwrap();
            assert_eq!(lease.task_id().as_str(), expected);
            lease.ack(Value::Null).await;
        }
        assert_eq!(
            scheduler.fetch_result(&"b".into(), true).await,
            FetchedResult::Finished(Value::Null)
        );

        // "a" is finished, so depending on it closes no cycle
        let id = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("b").depends_on(["a"]))
            .await
            .unwrap();
        let lease = scheduler.dequeue_next().await.unwrap();
        assert_eq!(lease.task_id(), &id);
    }

    #[tokio::test]
    async fn dropped_lease_fails_its_task() {
        let scheduler = scheduler();
        let a = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).with_id("a"))
            .await
            .unwrap();
        let b = scheduler
            .submit(
                TaskRequest::new(echo("bar"), vec![])
                    .with_id("b")
                    .incompatible_with(["foo"]),
            )
            .await
            .unwrap();

        let lease = scheduler.dequeue_next().await.unwrap();
        assert_eq!(lease.task_id(), &a);
        drop(lease);

        assert_eq!(wait_terminal(&scheduler, &a).await, TaskStatus::Failed);
        assert_eq!(
            scheduler.error_message(&a).await.as_deref(),
            Some("lease dropped")
        );

        let lease = scheduler.dequeue_next().await.unwrap();
        assert_eq!(lease.task_id(), &b);
        lease.ack(json!("ok")).await;
        tokio::task::yield_now().await;
        assert_eq!(
            scheduler.fetch_result(&b, false).await,
            FetchedResult::Finished(json!("ok"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_retry_settings_keep_a_positive_delay() {
        let scheduler = Scheduler::new(SchedulerConfig {
            retry_delay_ms: 0,
            retry_backoff: -2.0,
            max_retry_delay_ms: 0,
            ..SchedulerConfig::default()
        });
        scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]).depends_on(["never"]))
            .await
            .unwrap();

        for _ in 0..3 {
            assert!(scheduler.dequeue_next().await.is_none());
            assert!(scheduler.stats().await.retry_armed);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(scheduler.stats().await.retries_armed, 3);
    }

    #[tokio::test]
    async fn shutdown_stops_all_workers() {
        let scheduler = scheduler();
        scheduler.start().await;
        let id = scheduler
            .submit(TaskRequest::new(echo("foo"), vec![]))
            .await
            .unwrap();
        wait_terminal(&scheduler, &id).await;

        scheduler.shutdown().await;
        assert!(scheduler.workers().await.is_empty());
        assert_eq!(scheduler.stats().await.counts.finished, 1);
    }
}

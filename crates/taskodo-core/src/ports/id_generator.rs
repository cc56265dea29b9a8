//! IdGenerator port - ID 生成の抽象化
//!
//! # 実装
//! - **UlidGenerator**: ULID ベース（本番用）

use crate::domain::ids::{IdMarker, Task, TaskId, Worker, WorkerId};
use crate::ports::Clock;
use ulid::Ulid;

/// IdGenerator は衝突しない ID を生成
///
/// # Thread Safety
/// - `Send + Sync` を要求（Scheduler は複数タスクから共有される）
pub trait IdGenerator: Send + Sync {
    /// Task ID を生成
    fn generate_task_id(&self) -> TaskId;

    /// Worker ID を生成
    fn generate_worker_id(&self) -> WorkerId;
}

/// UlidGenerator は ULID ベースの ID 生成器
///
/// Clock を使って現在時刻ベースの ULID を生成します。
/// FixedClock を使うとタイムスタンプ部分が決定的になります。
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn generate_task_id(&self) -> TaskId {
        TaskId::new(format!("{}{}", Task::prefix(), self.next_ulid()))
    }

    fn generate_worker_id(&self) -> WorkerId {
        WorkerId::new(format!("{}{}", Worker::prefix(), self.next_ulid()))
    }
}

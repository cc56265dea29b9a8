//! taskodo-core
//!
//! In-process task scheduler with dependency and incompatibility constraints.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, task request）
//! - **ports**: 抽象化レイヤー（Clock, IdGenerator）
//! - **queue**: Scheduler（登録簿 + pending 列 + dequeue アルゴリズム + retry timer）
//! - **worker**: pull 型ワーカーループと実行ラッパー
//! - **runtime**: 遅延呼び出し（`TaskFn`）とその登録簿
//! - **config**: `SchedulerConfig`
//! - **observability**: status views

pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod runtime;
mod worker;

pub use config::{ConfigError, SchedulerConfig};
pub use domain::{TaskId, TaskRequest, TaskStatus, WorkerId, WorkerStatus};
pub use error::{SchedulerError, TaskError};
pub use observability::{SchedulerStats, TaskCounts, TaskSnapshot, WorkerSnapshot};
pub use queue::{FetchedResult, RetryPolicy, Scheduler, TaskLease};
pub use runtime::{AsyncFnTask, FnTask, FunctionRegistry, TaskFn};

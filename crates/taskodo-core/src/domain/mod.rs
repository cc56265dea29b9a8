//! Domain model (IDs, status labels, submission requests).

pub mod ids;
pub mod status;
pub mod task;

pub use ids::{TaskId, WorkerId};
pub use status::{TaskStatus, WorkerStatus};
pub use task::TaskRequest;

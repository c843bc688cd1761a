//! Worker pool that scores queued tasks.
//!
//! Workers receive tasks from the [`WorkQueue`](crate::queue::WorkQueue),
//! move the result record to `PROCESSING`, call the scorer and write the
//! final `COMPLETED` or `FAILED` record before acknowledging. A panic in the
//! scorer returns the task to the queue; a task that keeps failing is
//! dead-lettered once it reaches the attempt limit.

mod config;
mod pool;
mod types;
mod worker;

pub use config::{ProcessorConfig, RetryConfig};
pub use pool::{WorkerError, WorkerPool};
pub use types::{PoolStatus, TaskOutcome};

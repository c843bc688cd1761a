//! Types for the processor module.

use serde::{Deserialize, Serialize};

/// Status of the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Whether workers are running.
    pub running: bool,
    /// Configured number of workers.
    pub workers: usize,
    /// Workers alive right now.
    pub live_workers: usize,
    /// Tasks being handled right now.
    pub active_tasks: usize,
    /// Tasks completed since startup.
    pub total_completed: u64,
    /// Tasks failed permanently since startup (including dead-letters).
    pub total_failed: u64,
    /// Tasks returned to the queue after a fault.
    pub total_retried: u64,
    /// Tasks dead-lettered since startup.
    pub total_dead_lettered: u64,
    /// Deliveries dropped because a newer task owns the conversation.
    pub total_superseded: u64,
}

/// What a worker did with one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Scored and recorded as completed.
    Completed,
    /// Recorded as failed by the scorer's verdict.
    Failed,
    /// Exceeded its attempts, recorded as failed and removed.
    DeadLettered,
    /// Returned for redelivery after a fault.
    Retried,
    /// Dropped: the record belongs to a newer task or is already final.
    Skipped,
    /// The lease was lost before the task could be acknowledged.
    LeaseLost,
}

impl TaskOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskOutcome::Completed => "completed",
            TaskOutcome::Failed => "failed",
            TaskOutcome::DeadLettered => "dead_lettered",
            TaskOutcome::Retried => "retried",
            TaskOutcome::Skipped => "superseded",
            TaskOutcome::LeaseLost => "lease_lost",
        }
    }
}

//! Trait definitions for the queue module.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use super::error::{BlobError, QueueError};
use super::types::{BlobRef, DeadLetter, Delivery, Lease, ProcessingTask, QueueStats};

/// At-least-once delivery channel between ingestion and the worker pool.
///
/// A received task stays invisible to other consumers until its lease is
/// acknowledged, returned with `nack`, or expires. Returned and expired tasks
/// become visible again with `attempt_count` incremented, so a task may be
/// delivered more than once.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Returns the name of this queue implementation.
    fn name(&self) -> &str;

    /// Add a task. It is visible immediately.
    async fn enqueue(&self, task: ProcessingTask) -> Result<(), QueueError>;

    /// Take the next visible task, waiting up to `wait` for one to appear.
    ///
    /// Returns `None` when nothing became visible in time.
    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError>;

    /// Remove a task whose processing finished.
    async fn ack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Give a task back for redelivery.
    async fn nack(&self, lease: &Lease) -> Result<(), QueueError>;

    /// Remove a task permanently, keeping it for inspection.
    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<(), QueueError>;

    async fn stats(&self) -> Result<QueueStats, QueueError>;

    /// Live tasks (ready or leased) per tenant.
    ///
    /// Every live task holds one admission slot, so a durable queue reopened
    /// after a restart uses this to seed the backpressure counters.
    async fn in_flight_by_tenant(&self) -> Result<BTreeMap<String, usize>, QueueError>;

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError>;
}

/// Content-addressed storage for payloads too large to travel inline.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Returns the name of this blob store implementation.
    fn name(&self) -> &str;

    /// Store `data`, keyed by its SHA-256 digest. Storing the same content
    /// twice is a no-op.
    async fn put(&self, data: &[u8]) -> Result<BlobRef, BlobError>;

    async fn get(&self, digest: &str) -> Result<Vec<u8>, BlobError>;
}

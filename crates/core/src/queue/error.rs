//! Error types for the queue module.

use thiserror::Error;

/// Errors from work queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The lease is unknown: it expired and the task was handed out again,
    /// or the task was already acknowledged.
    #[error("Lease {lease_id} is no longer held")]
    LeaseLost { lease_id: String },

    /// A task with the same id is already queued.
    #[error("Task already queued: {task_id}")]
    Duplicate { task_id: String },

    /// Task could not be encoded or decoded.
    #[error("Task serialization failed: {0}")]
    Serialization(String),

    /// Backend storage failure.
    #[error("Queue storage error: {0}")]
    Storage(String),
}

/// Errors from blob store operations.
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Blob not found: {digest}")]
    NotFound { digest: String },

    /// Stored content no longer matches its digest.
    #[error("Blob {digest} is corrupt")]
    Corrupt { digest: String },

    #[error("Blob I/O error: {0}")]
    Io(#[from] std::io::Error),
}

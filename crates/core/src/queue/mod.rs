//! Work queue between ingestion and the worker pool.
//!
//! The [`WorkQueue`] trait is the at-least-once delivery contract the rest of
//! the pipeline relies on. Two backends are provided:
//! - [`MemoryWorkQueue`] for a single process
//! - [`SqliteWorkQueue`] for tasks that must survive a restart
//!
//! Large transcript text does not travel in the task. It goes to a
//! content-addressed [`BlobStore`] and the task carries the digest.

mod blob;
mod config;
mod error;
mod memory;
mod sqlite;
mod traits;
mod types;

pub use blob::{content_digest, load_payload, store_payload, FsBlobStore, MemoryBlobStore};
pub use config::{QueueBackend, QueueConfig};
pub use error::{BlobError, QueueError};
pub use memory::MemoryWorkQueue;
pub use sqlite::SqliteWorkQueue;
pub use traits::{BlobStore, WorkQueue};
pub use types::{
    BlobRef, DeadLetter, Delivery, Lease, ProcessingTask, QueueStats, TaskPayload,
};

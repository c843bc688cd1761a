//! Tenant-scoped store of processing outcomes.
//!
//! One [`ResultRecord`] exists per `(tenant_id, conversation_id)`. Its status
//! only moves forward, and only the task that owns the record may advance
//! it. A re-submission replaces the record unless it is `PROCESSING`.

mod config;
mod sqlite;
mod store;
mod types;

pub use config::{ResultsBackend, ResultsConfig};
pub use sqlite::SqliteResultStore;
pub use store::{MemoryResultStore, ResultStore};
pub use types::{check_write, ResultError, ResultRecord, ResultStatus};

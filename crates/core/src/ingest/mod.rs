//! Ingestion: from raw records and byte streams to queued tasks.
//!
//! Each record goes through validation, admission, a `PENDING` result record
//! and finally the work queue. Submissions return as soon as the task is
//! queued; scoring happens later in the worker pool.

mod coordinator;
mod types;

pub use coordinator::IngestionCoordinator;
pub use types::{Accepted, IngestReport, Rejection, SubmitError};

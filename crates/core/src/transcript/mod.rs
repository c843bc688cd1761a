//! Transcript records: the unit of input read from an ingestion stream.

mod types;

pub use types::{RecordError, TranscriptRecord};

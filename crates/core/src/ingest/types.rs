//! Types for the ingest module.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::admission::CapacityError;
use crate::decoder::{DecodeError, DecoderPosition};
use crate::results::{ResultError, ResultStatus};
use crate::transcript::RecordError;

/// Errors returned by a single submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The record does not match the transcript schema. Nothing was created.
    #[error("Invalid record: {0}")]
    Invalid(#[from] RecordError),

    /// No capacity. Nothing was created.
    #[error("Capacity exceeded: {0}")]
    Capacity(#[from] CapacityError),

    /// The conversation is being processed and cannot be re-submitted yet.
    #[error("Conflict: {0}")]
    Conflict(ResultError),

    /// Store, queue or blob failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SubmitError {
    /// Short machine-readable kind, also used as a metrics label.
    pub fn kind(&self) -> &'static str {
        match self {
            SubmitError::Invalid(_) => "invalid",
            SubmitError::Capacity(_) => "capacity",
            SubmitError::Conflict(_) => "conflict",
            SubmitError::Internal(_) => "internal",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            SubmitError::Capacity(err) => Some(err.retry_after()),
            _ => None,
        }
    }
}

/// Acknowledgment for an admitted record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub conversation_id: String,
    pub task_id: String,
    pub status: ResultStatus,
}

/// A stream element that did not become a task.
#[derive(Debug, Clone, Serialize)]
pub struct Rejection {
    /// Position of the element in the stream.
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    /// "malformed", "too_large", "invalid", "capacity", "conflict" or "internal".
    pub error: &'static str,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl Rejection {
    pub(crate) fn from_decode(err: &DecodeError) -> Self {
        Self {
            index: err.index().unwrap_or_default(),
            conversation_id: None,
            error: err.kind(),
            reason: err.to_string(),
            retry_after_ms: None,
        }
    }

    pub(crate) fn from_submit(index: usize, conversation_id: Option<String>, err: &SubmitError) -> Self {
        Self {
            index,
            conversation_id,
            error: err.kind(),
            reason: err.to_string(),
            retry_after_ms: err.retry_after().map(|d| d.as_millis() as u64),
        }
    }

    pub fn is_capacity(&self) -> bool {
        self.error == "capacity"
    }

    pub fn is_conflict(&self) -> bool {
        self.error == "conflict"
    }
}

/// Outcome of ingesting one stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestReport {
    /// Admitted records, in stream order.
    pub accepted: Vec<Accepted>,
    /// Elements that were skipped, in stream order.
    pub rejected: Vec<Rejection>,
    /// Set when the stream itself broke. Elements before it are unaffected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal_error: Option<String>,
    #[serde(skip)]
    pub position: Option<DecoderPosition>,
}

impl IngestReport {
    /// Elements seen, accepted or not.
    pub fn total(&self) -> usize {
        self.accepted.len() + self.rejected.len()
    }

    /// Largest retry hint among capacity rejections.
    pub fn retry_after(&self) -> Option<Duration> {
        self.rejected
            .iter()
            .filter_map(|r| r.retry_after_ms)
            .max()
            .map(Duration::from_millis)
    }
}

//! Types carried by the work queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a task's transcript text lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Text carried in the task itself.
    Inline { text: String },
    /// Text held in the blob store under its SHA-256 digest.
    Blob { digest: String, len: usize },
}

impl TaskPayload {
    /// Length of the text in bytes.
    pub fn len(&self) -> usize {
        match self {
            TaskPayload::Inline { text } => text.len(),
            TaskPayload::Blob { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unit of work handed from the coordinator to the worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingTask {
    /// Generated at admission, unique across tenants.
    pub task_id: String,
    pub tenant_id: String,
    pub conversation_id: String,
    pub payload: TaskPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    /// Number of earlier deliveries that ended without an ack.
    #[serde(default)]
    pub attempt_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl ProcessingTask {
    pub fn new(
        tenant_id: impl Into<String>,
        conversation_id: impl Into<String>,
        payload: TaskPayload,
    ) -> Self {
        Self {
            task_id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.into(),
            conversation_id: conversation_id.into(),
            payload,
            metadata: None,
            attempt_count: 0,
            enqueued_at: Utc::now(),
        }
    }

    /// Use an id generated ahead of the task, so the result record can be
    /// claimed before the payload is stored.
    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = task_id.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Option<Map<String, Value>>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Temporary exclusive claim on a delivered task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lease {
    pub id: String,
    pub task_id: String,
}

/// A task handed to one consumer, with the lease that hides it from others.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub task: ProcessingTask,
    pub lease: Lease,
}

/// A task removed from the queue for good.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub task: ProcessingTask,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Queue counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    /// Visible and waiting for a consumer.
    pub ready: usize,
    /// Held under an active lease.
    pub leased: usize,
    pub dead_lettered: usize,
}

/// Reference to content in a [`BlobStore`](super::BlobStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRef {
    pub digest: String,
    pub len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_serialization_is_tagged() {
        let inline = TaskPayload::Inline {
            text: "hello".to_string(),
        };
        let json = serde_json::to_value(&inline).unwrap();
        assert_eq!(json["kind"], "inline");
        assert_eq!(json["text"], "hello");

        let blob = TaskPayload::Blob {
            digest: "ab".repeat(32),
            len: 70_000,
        };
        let json = serde_json::to_value(&blob).unwrap();
        assert_eq!(json["kind"], "blob");
        assert_eq!(blob.len(), 70_000);
    }

    #[test]
    fn test_new_task_defaults() {
        let task = ProcessingTask::new(
            "t1",
            "c1",
            TaskPayload::Inline {
                text: String::new(),
            },
        );
        assert_eq!(task.attempt_count, 0);
        assert!(task.payload.is_empty());
        assert!(uuid::Uuid::parse_str(&task.task_id).is_ok());

        let other = ProcessingTask::new("t1", "c1", task.payload.clone());
        assert_ne!(task.task_id, other.task_id);
    }
}

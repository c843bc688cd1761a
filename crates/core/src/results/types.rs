//! Result record types and the status lifecycle.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Processing status of a conversation.
///
/// Moves forward only: `Pending -> Processing -> Completed | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Pending => "PENDING",
            ResultStatus::Processing => "PROCESSING",
            ResultStatus::Completed => "COMPLETED",
            ResultStatus::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(ResultStatus::Pending),
            "PROCESSING" => Some(ResultStatus::Processing),
            "COMPLETED" => Some(ResultStatus::Completed),
            "FAILED" => Some(ResultStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ResultStatus::Completed | ResultStatus::Failed)
    }

    /// Whether the same task may move from `self` to `next`.
    ///
    /// `Processing -> Processing` is allowed for redelivered tasks.
    pub fn can_transition_to(&self, next: ResultStatus) -> bool {
        use ResultStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Processing, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
        )
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of processing one conversation, keyed by tenant and conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub tenant_id: String,
    pub conversation_id: String,
    /// Task that owns this record. Only that task's worker may advance it.
    pub task_id: String,
    pub status: ResultStatus,
    /// Present only when completed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Present only when failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ResultRecord {
    /// Fresh record for an admitted task.
    pub fn pending(
        tenant_id: impl Into<String>,
        conversation_id: impl Into<String>,
        task_id: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            tenant_id: tenant_id.into(),
            conversation_id: conversation_id.into(),
            task_id: task_id.into(),
            status: ResultStatus::Pending,
            sentiment_score: None,
            summary: None,
            tags: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn to_processing(&self) -> Self {
        Self {
            status: ResultStatus::Processing,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn to_completed(&self, sentiment_score: f64, summary: String, tags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            status: ResultStatus::Completed,
            sentiment_score: Some(sentiment_score),
            summary: Some(summary),
            tags,
            error: None,
            updated_at: now,
            completed_at: Some(now),
            ..self.clone()
        }
    }

    pub fn to_failed(&self, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            status: ResultStatus::Failed,
            sentiment_score: None,
            summary: None,
            tags: Vec::new(),
            error: Some(error.into()),
            updated_at: now,
            completed_at: Some(now),
            ..self.clone()
        }
    }
}

/// Errors from result store operations.
#[derive(Debug, Error)]
pub enum ResultError {
    /// A re-submission arrived while the conversation is being processed.
    #[error("Conversation {conversation_id} is being processed")]
    InFlight { conversation_id: String },

    /// The record now belongs to a newer task.
    #[error("Conversation {conversation_id} was superseded by task {current_task_id}")]
    Superseded {
        conversation_id: String,
        current_task_id: String,
    },

    /// The write would move the status backwards.
    #[error("Cannot move conversation {conversation_id} from {from} to {to}")]
    InvalidTransition {
        conversation_id: String,
        from: ResultStatus,
        to: ResultStatus,
    },

    /// The record does not belong under the key it was written to.
    #[error("Record for {found} written under key {expected}")]
    KeyMismatch { expected: String, found: String },

    /// Backend storage failure.
    #[error("Result storage error: {0}")]
    Storage(String),
}

/// Check a write against the record it replaces.
///
/// A write from a different task is a re-submission: it must be `Pending`
/// and the current record must not be `Processing`. A write from the owning
/// task must be a forward transition.
pub fn check_write(existing: Option<&ResultRecord>, next: &ResultRecord) -> Result<(), ResultError> {
    let Some(existing) = existing else {
        return Ok(());
    };

    if existing.task_id != next.task_id {
        if next.status != ResultStatus::Pending {
            return Err(ResultError::Superseded {
                conversation_id: existing.conversation_id.clone(),
                current_task_id: existing.task_id.clone(),
            });
        }
        if existing.status == ResultStatus::Processing {
            return Err(ResultError::InFlight {
                conversation_id: existing.conversation_id.clone(),
            });
        }
        return Ok(());
    }

    if !existing.status.can_transition_to(next.status) {
        return Err(ResultError::InvalidTransition {
            conversation_id: existing.conversation_id.clone(),
            from: existing.status,
            to: next.status,
        });
    }
    Ok(())
}

pub(crate) fn check_key(
    tenant_id: &str,
    conversation_id: &str,
    record: &ResultRecord,
) -> Result<(), ResultError> {
    if record.tenant_id != tenant_id || record.conversation_id != conversation_id {
        return Err(ResultError::KeyMismatch {
            expected: format!("{}/{}", tenant_id, conversation_id),
            found: format!("{}/{}", record.tenant_id, record.conversation_id),
        });
    }
    Ok(())
}

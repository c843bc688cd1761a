//! Transcript record type and schema validation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Validation failure for a single raw record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record must be a JSON object")]
    NotAnObject,

    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("field {field} must be {expected}")]
    InvalidType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("field {0} must not be empty")]
    EmptyField(&'static str),

    #[error("record tenant_id {found} does not match request tenant {expected}")]
    TenantMismatch { expected: String, found: String },
}

/// One transcript read from an ingestion stream.
///
/// Immutable once validated; the coordinator moves it into a processing task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptRecord {
    /// Unique within a tenant.
    pub conversation_id: String,
    pub tenant_id: String,
    pub text: String,
    /// Opaque key-value mapping carried through to the worker untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl TranscriptRecord {
    /// Validate a raw JSON value against the transcript schema.
    ///
    /// `tenant_id` is the tenant the submission was made for. A record may
    /// omit its own `tenant_id`; when present it must match.
    pub fn from_value(tenant_id: &str, value: Value) -> Result<Self, RecordError> {
        if tenant_id.is_empty() {
            return Err(RecordError::EmptyField("tenant_id"));
        }

        let Value::Object(mut object) = value else {
            return Err(RecordError::NotAnObject);
        };

        let conversation_id = required_string(&mut object, "conversation_id")?;
        if conversation_id.is_empty() {
            return Err(RecordError::EmptyField("conversation_id"));
        }

        let text = required_string(&mut object, "text")?;

        match object.remove("tenant_id") {
            None | Some(Value::Null) => {}
            Some(Value::String(found)) if found == tenant_id => {}
            Some(Value::String(found)) => {
                return Err(RecordError::TenantMismatch {
                    expected: tenant_id.to_string(),
                    found,
                })
            }
            Some(_) => {
                return Err(RecordError::InvalidType {
                    field: "tenant_id",
                    expected: "a string",
                })
            }
        }

        let metadata = match object.remove("metadata") {
            None | Some(Value::Null) => None,
            Some(Value::Object(map)) => Some(map),
            Some(_) => {
                return Err(RecordError::InvalidType {
                    field: "metadata",
                    expected: "an object",
                })
            }
        };

        Ok(Self {
            conversation_id,
            tenant_id: tenant_id.to_string(),
            text,
            metadata,
        })
    }
}

fn required_string(object: &mut Map<String, Value>, field: &'static str) -> Result<String, RecordError> {
    match object.remove(field) {
        None | Some(Value::Null) => Err(RecordError::MissingField(field)),
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(RecordError::InvalidType {
            field,
            expected: "a string",
        }),
    }
}

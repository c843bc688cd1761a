//! Testing utilities.
//!
//! [`MockScorer`] stands in for a real scoring model and can be scripted to
//! fail, panic or stall, which is what most pipeline tests need.

mod mock_scorer;

pub use mock_scorer::MockScorer;

/// Test fixtures and helper functions.
pub mod fixtures {
    use serde_json::{json, Value};

    /// A transcript record as it arrives on the wire.
    pub fn transcript(tenant_id: &str, conversation_id: &str, text: &str) -> Value {
        json!({
            "conversation_id": conversation_id,
            "tenant_id": tenant_id,
            "text": text,
        })
    }

    /// NDJSON body with one record per line.
    pub fn ndjson(records: &[Value]) -> String {
        records
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// JSON array body.
    pub fn json_array(records: &[Value]) -> String {
        Value::Array(records.to_vec()).to_string()
    }
}

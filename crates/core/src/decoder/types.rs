//! Types for the streaming decoder.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// How the incoming byte stream is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Framing {
    /// Detect from the first non-whitespace byte: `[` selects `Array`,
    /// anything else selects `Ndjson`.
    #[default]
    Auto,
    /// A single top-level JSON array of objects.
    Array,
    /// One JSON object per line.
    Ndjson,
}

impl Framing {
    /// Pick a framing from an HTTP content type.
    pub fn from_content_type(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return Framing::Auto;
        };
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        match essence.as_str() {
            "application/x-ndjson" | "application/ndjson" | "application/jsonl"
            | "application/jsonlines" | "application/x-jsonlines" => Framing::Ndjson,
            _ => Framing::Auto,
        }
    }
}

/// One decoded element, in stream order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedElement {
    /// Zero-based position of the element within the stream.
    pub index: usize,
    pub value: Value,
}

/// Where the decoder stands in the stream.
///
/// `byte_offset` always falls on an element boundary once the decoder has
/// emitted `elements` items, so a producer can resume from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderPosition {
    /// Elements emitted so far (including failed ones).
    pub elements: usize,
    /// Bytes consumed from the stream so far.
    pub byte_offset: u64,
}

/// Error produced while decoding a stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// One element is not valid JSON. Decoding continues.
    #[error("element {index} is not valid JSON: {reason}")]
    Malformed { index: usize, reason: String },

    /// One element exceeds the size limit. It is skipped and decoding continues.
    #[error("element {index} is {size} bytes, exceeding the {limit} byte limit")]
    TooLarge {
        index: usize,
        size: usize,
        limit: usize,
    },

    /// The top-level structure is broken. Nothing further is decoded.
    #[error("framing error at byte {offset}: {reason}")]
    Framing { offset: u64, reason: String },

    /// The underlying byte stream failed. Nothing further is decoded.
    #[error("failed to read stream: {0}")]
    Io(String),
}

impl DecodeError {
    /// Whether this error ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DecodeError::Framing { .. } | DecodeError::Io(_))
    }

    /// Index of the offending element, for element-level errors.
    pub fn index(&self) -> Option<usize> {
        match self {
            DecodeError::Malformed { index, .. } | DecodeError::TooLarge { index, .. } => {
                Some(*index)
            }
            DecodeError::Framing { .. } | DecodeError::Io(_) => None,
        }
    }

    /// Short label used for metrics and API error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            DecodeError::Malformed { .. } => "malformed",
            DecodeError::TooLarge { .. } => "too_large",
            DecodeError::Framing { .. } => "framing",
            DecodeError::Io(_) => "io",
        }
    }
}

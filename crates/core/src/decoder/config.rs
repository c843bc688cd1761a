//! Configuration for the streaming decoder.

use serde::{Deserialize, Serialize};

/// Decoder limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Largest single element (array item or line) accepted, in bytes.
    /// Larger elements are skipped and reported individually.
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,
}

fn default_max_record_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_record_bytes: default_max_record_bytes(),
        }
    }
}

impl DecoderConfig {
    /// Sets the per-element size limit.
    pub fn with_max_record_bytes(mut self, max: usize) -> Self {
        self.max_record_bytes = max;
        self
    }
}

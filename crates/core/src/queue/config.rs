//! Configuration for the work queue.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Work queue backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    /// In-process queue. Tasks do not survive a restart.
    #[default]
    Memory,
    /// SQLite table in the configured database file.
    Sqlite,
}

/// Work queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackend,

    /// How long a received task stays invisible before it is redelivered.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,

    /// Polling interval of the SQLite backend, in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Text longer than this is moved to the blob store.
    #[serde(default = "default_inline_payload_max")]
    pub inline_payload_max_bytes: usize,

    /// Directory for the filesystem blob store. In-memory when unset.
    #[serde(default)]
    pub blob_dir: Option<PathBuf>,
}

fn default_visibility_timeout() -> u64 {
    30
}

fn default_poll_interval() -> u64 {
    50
}

fn default_inline_payload_max() -> usize {
    64 * 1024 // 64 KiB
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            backend: QueueBackend::default(),
            visibility_timeout_secs: default_visibility_timeout(),
            poll_interval_ms: default_poll_interval(),
            inline_payload_max_bytes: default_inline_payload_max(),
            blob_dir: None,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Sets the backend.
    pub fn with_backend(mut self, backend: QueueBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Sets the inline payload threshold.
    pub fn with_inline_payload_max(mut self, max: usize) -> Self {
        self.inline_payload_max_bytes = max;
        self
    }
}

//! Configuration for the result store.

use serde::{Deserialize, Serialize};

/// Result store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultsBackend {
    #[default]
    Memory,
    /// Table in the configured database file.
    Sqlite,
}

/// Result store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResultsConfig {
    #[serde(default)]
    pub backend: ResultsBackend,
}

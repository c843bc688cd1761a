use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::admission::AdmissionConfig;
use crate::decoder::DecoderConfig;
use crate::processor::ProcessorConfig;
use crate::queue::QueueConfig;
use crate::results::ResultsConfig;
use crate::scoring::ScoringConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub decoder: DecoderConfig,
    #[serde(default)]
    pub admission: AdmissionConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub results: ResultsConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl Config {
    /// SHA-256 of the effective configuration, hex encoded.
    ///
    /// Lets operators tell at a glance whether two instances run the same
    /// settings.
    pub fn fingerprint(&self) -> String {
        let encoded = serde_json::to_vec(self).unwrap_or_default();
        let digest = Sha256::digest(&encoded);
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Database configuration, shared by the SQLite backends.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("parley.db")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.path, PathBuf::from("parley.db"));
        assert_eq!(config.processor.workers, 4);
    }

    #[test]
    fn test_fingerprint_tracks_changes() {
        let a = Config::default();
        let mut b = Config::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);

        b.processor.workers = 9;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}

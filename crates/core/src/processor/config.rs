//! Configuration for the processor module.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the worker pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Number of worker threads.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// How long a worker waits on an empty queue before checking for shutdown.
    #[serde(default = "default_receive_wait")]
    pub receive_wait_ms: u64,

    /// Retry configuration.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Deliveries allowed per task. A delivery whose `attempt_count` has
    /// reached this is dead-lettered without being scored.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_workers() -> usize {
    4
}

fn default_receive_wait() -> u64 {
    500
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            receive_wait_ms: default_receive_wait(),
            retry: RetryConfig::default(),
        }
    }
}

impl ProcessorConfig {
    /// Sets the number of workers.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Sets the maximum attempts per task.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    /// Sets the receive wait.
    pub fn with_receive_wait_ms(mut self, wait_ms: u64) -> Self {
        self.receive_wait_ms = wait_ms;
        self
    }

    pub fn receive_wait(&self) -> Duration {
        Duration::from_millis(self.receive_wait_ms)
    }
}

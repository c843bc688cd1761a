//! Configuration for the backpressure controller.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Water marks and delay policy for admission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// In-flight count at which new submissions start being delayed.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// In-flight count at which new submissions are rejected outright.
    #[serde(default = "default_hard_water_mark")]
    pub hard_water_mark: usize,

    /// Optional per-tenant in-flight cap.
    #[serde(default)]
    pub tenant_hard_limit: Option<usize>,

    /// Delay per task above the high water mark, in milliseconds.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound on a single delay, in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Delays a caller sits through before it is rejected.
    #[serde(default = "default_max_delay_retries")]
    pub max_delay_retries: u32,
}

fn default_high_water_mark() -> usize {
    800
}

fn default_hard_water_mark() -> usize {
    1000
}

fn default_base_delay() -> u64 {
    25
}

fn default_max_delay() -> u64 {
    1000
}

fn default_max_delay_retries() -> u32 {
    5
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            high_water_mark: default_high_water_mark(),
            hard_water_mark: default_hard_water_mark(),
            tenant_hard_limit: None,
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
            max_delay_retries: default_max_delay_retries(),
        }
    }
}

impl AdmissionConfig {
    /// Sets both water marks.
    pub fn with_water_marks(mut self, high: usize, hard: usize) -> Self {
        self.high_water_mark = high;
        self.hard_water_mark = hard;
        self
    }

    /// Sets the per-tenant cap.
    pub fn with_tenant_limit(mut self, limit: usize) -> Self {
        self.tenant_hard_limit = Some(limit);
        self
    }

    /// Sets the delay policy.
    pub fn with_delays(mut self, base_ms: u64, max_ms: u64, max_retries: u32) -> Self {
        self.base_delay_ms = base_ms;
        self.max_delay_ms = max_ms;
        self.max_delay_retries = max_retries;
        self
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

//! Admission decisions, errors and status.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Outcome of a single admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// A slot was reserved for the task. It must be released once the task
    /// completes or fails.
    Allow,
    /// Above the high water mark. Retry after the given duration.
    Delay(Duration),
    /// No capacity.
    Reject(CapacityError),
}

impl Admission {
    pub fn kind(&self) -> &'static str {
        match self {
            Admission::Allow => "allow",
            Admission::Delay(_) => "delay",
            Admission::Reject(_) => "reject",
        }
    }
}

/// Submission refused for capacity reasons. Callers should retry later.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapacityError {
    #[error("global in-flight limit reached ({in_flight}/{limit})")]
    GlobalLimit {
        in_flight: usize,
        limit: usize,
        retry_after: Duration,
    },

    #[error("tenant {tenant} in-flight limit reached ({in_flight}/{limit})")]
    TenantLimit {
        tenant: String,
        in_flight: usize,
        limit: usize,
        retry_after: Duration,
    },

    #[error("still over capacity after {retries} delays")]
    Saturated { retries: u32, retry_after: Duration },
}

impl CapacityError {
    /// Suggested wait before the caller tries again.
    pub fn retry_after(&self) -> Duration {
        match self {
            CapacityError::GlobalLimit { retry_after, .. }
            | CapacityError::TenantLimit { retry_after, .. }
            | CapacityError::Saturated { retry_after, .. } => *retry_after,
        }
    }
}

/// Snapshot of the controller's counters.
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStatus {
    pub in_flight: usize,
    pub high_water_mark: usize,
    pub hard_water_mark: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_hard_limit: Option<usize>,
    /// In-flight count per tenant. Tenants with nothing in flight are omitted.
    pub tenants: BTreeMap<String, usize>,
}

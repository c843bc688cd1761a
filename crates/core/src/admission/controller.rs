//! Backpressure controller implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{debug, info, warn};

use super::config::AdmissionConfig;
use super::types::{Admission, AdmissionStatus, CapacityError};
use crate::metrics;

#[derive(Debug, Default)]
struct Counters {
    global: usize,
    tenants: HashMap<String, usize>,
}

struct Inner {
    config: AdmissionConfig,
    counters: Mutex<Counters>,
}

/// Gate in front of the work queue.
///
/// Counts tasks in flight per tenant and globally. Every decision and every
/// release is a single update under one lock, so concurrent submissions can
/// neither over-admit nor lose a release.
#[derive(Clone)]
pub struct BackpressureController {
    inner: Arc<Inner>,
}

impl BackpressureController {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                counters: Mutex::new(Counters::default()),
            }),
        }
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.inner.config
    }

    /// Single admission check for `tenant`.
    ///
    /// `Allow` reserves a slot; the caller owns it and must eventually call
    /// [`release`](Self::release).
    pub fn admit(&self, tenant: &str) -> Admission {
        self.decide(tenant, None).0
    }

    /// Admission with the delay/retry loop applied.
    ///
    /// A delayed caller sleeps and asks again. On a retry it is admitted if
    /// the in-flight count has not grown since its previous check; otherwise
    /// it is delayed again, up to `max_delay_retries` times.
    pub async fn acquire(&self, tenant: &str) -> Result<AdmissionPermit, CapacityError> {
        let mut previous = None;
        let mut delays = 0;

        loop {
            let (decision, observed) = self.decide(tenant, previous);
            match decision {
                Admission::Allow => {
                    return Ok(AdmissionPermit {
                        controller: self.clone(),
                        tenant: tenant.to_string(),
                        armed: true,
                    })
                }
                Admission::Reject(err) => return Err(err),
                Admission::Delay(delay) => {
                    if delays >= self.inner.config.max_delay_retries {
                        metrics::ADMISSION_DECISIONS
                            .with_label_values(&["reject"])
                            .inc();
                        warn!(tenant = %tenant, delays, "Admission saturated after delays");
                        return Err(CapacityError::Saturated {
                            retries: delays,
                            retry_after: self.inner.config.max_delay(),
                        });
                    }
                    delays += 1;
                    debug!(tenant = %tenant, delay_ms = delay.as_millis() as u64, "Admission delayed");
                    tokio::time::sleep(delay).await;
                    previous = Some(observed);
                }
            }
        }
    }

    /// Return a slot reserved by an earlier `Allow`.
    ///
    /// A release for a tenant with nothing in flight is ignored.
    pub fn release(&self, tenant: &str) {
        let mut counters = self.lock();

        let Some(count) = counters.tenants.get_mut(tenant) else {
            warn!(tenant = %tenant, "Release without a matching admission");
            return;
        };
        *count -= 1;
        if *count == 0 {
            counters.tenants.remove(tenant);
        }
        counters.global = counters.global.saturating_sub(1);
        metrics::TASKS_IN_FLIGHT.set(counters.global as i64);
    }

    /// Count `n` tasks of `tenant` that are already queued.
    ///
    /// Used on startup for tasks that survived in a durable queue. Limits are
    /// not checked: the tasks exist whether or not they fit.
    pub fn restore(&self, tenant: &str, n: usize) {
        if n == 0 {
            return;
        }
        let mut counters = self.lock();
        counters.global += n;
        *counters.tenants.entry(tenant.to_string()).or_insert(0) += n;
        metrics::TASKS_IN_FLIGHT.set(counters.global as i64);
        info!(tenant = %tenant, restored = n, in_flight = counters.global, "Restored in-flight tasks");
    }

    /// Current in-flight count across all tenants.
    pub fn in_flight(&self) -> usize {
        self.lock().global
    }

    /// Current in-flight count for one tenant.
    pub fn tenant_in_flight(&self, tenant: &str) -> usize {
        self.lock().tenants.get(tenant).copied().unwrap_or(0)
    }

    pub fn status(&self) -> AdmissionStatus {
        let counters = self.lock();
        AdmissionStatus {
            in_flight: counters.global,
            high_water_mark: self.inner.config.high_water_mark,
            hard_water_mark: self.inner.config.hard_water_mark,
            tenant_hard_limit: self.inner.config.tenant_hard_limit,
            tenants: counters
                .tenants
                .iter()
                .map(|(tenant, count)| (tenant.clone(), *count))
                .collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        // Every update leaves the counters consistent, so a poisoned lock is still usable.
        self.inner
            .counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide and, on `Allow`, reserve, all under the counters lock.
    /// Also returns the global count the decision was based on.
    fn decide(&self, tenant: &str, previous: Option<usize>) -> (Admission, usize) {
        let config = &self.inner.config;
        let mut counters = self.lock();
        let global = counters.global;
        let tenant_count = counters.tenants.get(tenant).copied().unwrap_or(0);

        let decision = if global >= config.hard_water_mark {
            Admission::Reject(CapacityError::GlobalLimit {
                in_flight: global,
                limit: config.hard_water_mark,
                retry_after: config.max_delay(),
            })
        } else if let Some(limit) = config
            .tenant_hard_limit
            .filter(|limit| tenant_count >= *limit)
        {
            Admission::Reject(CapacityError::TenantLimit {
                tenant: tenant.to_string(),
                in_flight: tenant_count,
                limit,
                retry_after: config.max_delay(),
            })
        } else if global < config.high_water_mark {
            Admission::Allow
        } else {
            match previous {
                Some(seen) if global <= seen => Admission::Allow,
                _ => Admission::Delay(self.backoff(global)),
            }
        };

        if decision == Admission::Allow {
            counters.global += 1;
            *counters.tenants.entry(tenant.to_string()).or_insert(0) += 1;
            metrics::TASKS_IN_FLIGHT.set(counters.global as i64);
        }
        drop(counters);

        metrics::ADMISSION_DECISIONS
            .with_label_values(&[decision.kind()])
            .inc();
        if let Admission::Reject(ref err) = decision {
            warn!(tenant = %tenant, error = %err, "Admission rejected");
        }

        (decision, global)
    }

    /// Delay grows with the depth above the high water mark.
    fn backoff(&self, global: usize) -> Duration {
        let config = &self.inner.config;
        let depth = (global - config.high_water_mark + 1) as u64;
        let millis = config
            .base_delay_ms
            .saturating_mul(depth)
            .min(config.max_delay_ms);
        Duration::from_millis(millis)
    }
}

/// A reserved admission slot.
///
/// Dropping an uncommitted permit returns the slot, which covers submissions
/// cancelled before their task reached the queue.
pub struct AdmissionPermit {
    controller: BackpressureController,
    tenant: String,
    armed: bool,
}

impl AdmissionPermit {
    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    /// Keep the slot reserved past this permit. Ownership passes to the task,
    /// whose worker releases it through [`BackpressureController::release`].
    pub fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.armed {
            self.controller.release(&self.tenant);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(high: usize, hard: usize) -> BackpressureController {
        BackpressureController::new(AdmissionConfig::default().with_water_marks(high, hard))
    }

    #[test]
    fn test_allow_below_high_water_mark() {
        let controller = controller(2, 4);
        assert_eq!(controller.admit("t1"), Admission::Allow);
        assert_eq!(controller.admit("t2"), Admission::Allow);
        assert_eq!(controller.in_flight(), 2);
        assert_eq!(controller.tenant_in_flight("t1"), 1);
    }

    #[test]
    fn test_delay_between_marks() {
        let controller = BackpressureController::new(
            AdmissionConfig::default()
                .with_water_marks(1, 4)
                .with_delays(10, 25, 3),
        );
        assert_eq!(controller.admit("t1"), Admission::Allow);
        assert_eq!(
            controller.admit("t1"),
            Admission::Delay(Duration::from_millis(10))
        );
        // Delays never reserve a slot.
        assert_eq!(controller.in_flight(), 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let controller = BackpressureController::new(
            AdmissionConfig::default()
                .with_water_marks(1, 10)
                .with_delays(10, 25, 3),
        );
        assert_eq!(controller.backoff(1), Duration::from_millis(10));
        assert_eq!(controller.backoff(2), Duration::from_millis(20));
        assert_eq!(controller.backoff(5), Duration::from_millis(25));
    }

    #[test]
    fn test_reject_at_hard_water_mark() {
        let controller = controller(2, 2);
        assert_eq!(controller.admit("t1"), Admission::Allow);
        assert_eq!(controller.admit("t1"), Admission::Allow);

        match controller.admit("t2") {
            Admission::Reject(CapacityError::GlobalLimit {
                in_flight, limit, ..
            }) => {
                assert_eq!(in_flight, 2);
                assert_eq!(limit, 2);
            }
            other => panic!("expected global reject, got {:?}", other),
        }

        controller.release("t1");
        assert_eq!(controller.admit("t2"), Admission::Allow);
    }

    #[test]
    fn test_tenant_limit() {
        let controller =
            BackpressureController::new(AdmissionConfig::default().with_tenant_limit(1));
        assert_eq!(controller.admit("t1"), Admission::Allow);
        assert!(matches!(
            controller.admit("t1"),
            Admission::Reject(CapacityError::TenantLimit { .. })
        ));
        assert_eq!(controller.admit("t2"), Admission::Allow);
    }

    #[test]
    fn test_restored_tasks_count_against_limits() {
        let controller = controller(2, 2);
        controller.restore("t1", 3);
        controller.restore("t2", 0);
        assert_eq!(controller.in_flight(), 3);
        assert_eq!(controller.tenant_in_flight("t1"), 3);
        assert!(matches!(
            controller.admit("t2"),
            Admission::Reject(CapacityError::GlobalLimit { .. })
        ));

        controller.release("t1");
        controller.release("t1");
        assert_eq!(controller.admit("t2"), Admission::Allow);
        assert_eq!(controller.in_flight(), 2);
    }

    #[test]
    fn test_release_without_admission_is_ignored() {
        let controller = controller(10, 10);
        assert_eq!(controller.admit("t1"), Admission::Allow);
        controller.release("t1");
        controller.release("t1");
        controller.release("unknown");
        assert_eq!(controller.in_flight(), 0);

        assert_eq!(controller.admit("t2"), Admission::Allow);
        controller.release("t1");
        assert_eq!(controller.in_flight(), 1);
    }

    #[test]
    fn test_status_snapshot() {
        let controller = controller(10, 20);
        controller.admit("t1");
        controller.admit("t1");
        controller.admit("t2");
        controller.release("t2");

        let status = controller.status();
        assert_eq!(status.in_flight, 2);
        assert_eq!(status.high_water_mark, 10);
        assert_eq!(status.hard_water_mark, 20);
        assert_eq!(status.tenants.get("t1"), Some(&2));
        assert!(!status.tenants.contains_key("t2"));
    }

    #[tokio::test]
    async fn test_permit_drop_releases_slot() {
        let controller = controller(5, 5);
        let permit = controller.acquire("t1").await.unwrap();
        assert_eq!(permit.tenant(), "t1");
        assert_eq!(controller.in_flight(), 1);
        drop(permit);
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_committed_permit_keeps_slot() {
        let controller = controller(5, 5);
        controller.acquire("t1").await.unwrap().commit();
        assert_eq!(controller.in_flight(), 1);
        controller.release("t1");
        assert_eq!(controller.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_admits_after_delay_when_not_growing() {
        let controller = BackpressureController::new(
            AdmissionConfig::default()
                .with_water_marks(1, 3)
                .with_delays(10, 100, 3),
        );
        controller.acquire("t1").await.unwrap().commit();

        let started = tokio::time::Instant::now();
        controller.acquire("t1").await.unwrap().commit();
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert_eq!(controller.in_flight(), 2);
    }

    #[tokio::test]
    async fn test_acquire_saturates_without_retries() {
        let controller = BackpressureController::new(
            AdmissionConfig::default()
                .with_water_marks(1, 3)
                .with_delays(10, 100, 0),
        );
        controller.acquire("t1").await.unwrap().commit();

        let err = controller.acquire("t1").await.err().unwrap();
        assert!(matches!(err, CapacityError::Saturated { retries: 0, .. }));
        assert_eq!(err.retry_after(), Duration::from_millis(100));
        assert_eq!(controller.in_flight(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admission_never_over_admits() {
        let controller = controller(10, 10);

        let handles: Vec<_> = (0..50)
            .map(|i| {
                let controller = controller.clone();
                tokio::spawn(async move {
                    let tenant = format!("t{}", i % 3);
                    controller.acquire(&tenant).await.map(|permit| permit.commit())
                })
            })
            .collect();

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                admitted += 1;
            }
        }

        assert_eq!(admitted, 10);
        let status = controller.status();
        assert_eq!(status.in_flight, 10);
        assert_eq!(status.tenants.values().sum::<usize>(), 10);
    }
}

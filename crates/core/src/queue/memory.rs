//! In-process work queue.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::error::QueueError;
use super::traits::WorkQueue;
use super::types::{DeadLetter, Delivery, Lease, ProcessingTask, QueueStats};

struct Entry {
    task: ProcessingTask,
    lease: Option<ActiveLease>,
}

struct ActiveLease {
    id: String,
    expires_at: Instant,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    ready: VecDeque<String>,
    dead: Vec<DeadLetter>,
}

impl State {
    /// Make tasks with expired leases visible again.
    fn reclaim_expired(&mut self, now: Instant) {
        for entry in self.entries.values_mut() {
            let expired = entry
                .lease
                .as_ref()
                .is_some_and(|lease| lease.expires_at <= now);
            if expired {
                entry.lease = None;
                entry.task.attempt_count += 1;
                debug!(
                    task_id = %entry.task.task_id,
                    attempt = entry.task.attempt_count,
                    "Lease expired, task visible again"
                );
                self.ready.push_back(entry.task.task_id.clone());
            }
        }
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.entries
            .values()
            .filter_map(|entry| entry.lease.as_ref().map(|lease| lease.expires_at))
            .min()
    }

    /// Remove the lease from its task, if `lease` is still the one held.
    fn take_lease(&mut self, lease: &Lease) -> Result<&mut Entry, QueueError> {
        match self.entries.get_mut(&lease.task_id) {
            Some(entry) if entry.lease.as_ref().is_some_and(|held| held.id == lease.id) => {
                entry.lease = None;
                Ok(entry)
            }
            _ => Err(QueueError::LeaseLost {
                lease_id: lease.id.clone(),
            }),
        }
    }
}

/// Work queue held in process memory.
///
/// Suitable for a single process hosting both ingestion and workers. Leases
/// expire on the tokio clock, so tests can drive expiry with paused time.
pub struct MemoryWorkQueue {
    visibility_timeout: Duration,
    state: Mutex<State>,
    notify: Notify,
}

impl MemoryWorkQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            visibility_timeout,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, QueueError> {
        self.state
            .lock()
            .map_err(|e| QueueError::Storage(e.to_string()))
    }
}

#[async_trait]
impl WorkQueue for MemoryWorkQueue {
    fn name(&self) -> &str {
        "memory"
    }

    async fn enqueue(&self, task: ProcessingTask) -> Result<(), QueueError> {
        {
            let mut state = self.lock()?;
            if state.entries.contains_key(&task.task_id) {
                return Err(QueueError::Duplicate {
                    task_id: task.task_id,
                });
            }
            state.ready.push_back(task.task_id.clone());
            state
                .entries
                .insert(task.task_id.clone(), Entry { task, lease: None });
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self, wait: Duration) -> Result<Option<Delivery>, QueueError> {
        let deadline = Instant::now() + wait;

        loop {
            let next_expiry = {
                let now = Instant::now();
                let mut state = self.lock()?;
                state.reclaim_expired(now);

                while let Some(task_id) = state.ready.pop_front() {
                    // Entries acked or dead-lettered while queued are skipped.
                    let Some(entry) = state.entries.get_mut(&task_id) else {
                        continue;
                    };
                    if entry.lease.is_some() {
                        continue;
                    }
                    let lease_id = uuid::Uuid::new_v4().to_string();
                    entry.lease = Some(ActiveLease {
                        id: lease_id.clone(),
                        expires_at: now + self.visibility_timeout,
                    });
                    return Ok(Some(Delivery {
                        task: entry.task.clone(),
                        lease: Lease {
                            id: lease_id,
                            task_id,
                        },
                    }));
                }

                state.next_expiry()
            };

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let wake_at = next_expiry.map_or(deadline, |expiry| expiry.min(deadline));
            let _ = tokio::time::timeout_at(wake_at, self.notify.notified()).await;
        }
    }

    async fn ack(&self, lease: &Lease) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state.take_lease(lease)?;
        state.entries.remove(&lease.task_id);
        Ok(())
    }

    async fn nack(&self, lease: &Lease) -> Result<(), QueueError> {
        {
            let mut state = self.lock()?;
            let entry = state.take_lease(lease)?;
            entry.task.attempt_count += 1;
            state.ready.push_back(lease.task_id.clone());
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, lease: &Lease, reason: &str) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        state.take_lease(lease)?;
        if let Some(entry) = state.entries.remove(&lease.task_id) {
            state.dead.push(DeadLetter {
                task: entry.task,
                reason: reason.to_string(),
                dead_lettered_at: Utc::now(),
            });
        }
        Ok(())
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let state = self.lock()?;
        let leased = state
            .entries
            .values()
            .filter(|entry| entry.lease.is_some())
            .count();
        Ok(QueueStats {
            ready: state.entries.len() - leased,
            leased,
            dead_lettered: state.dead.len(),
        })
    }

    async fn in_flight_by_tenant(&self) -> Result<BTreeMap<String, usize>, QueueError> {
        let state = self.lock()?;
        let mut counts = BTreeMap::new();
        for entry in state.entries.values() {
            *counts.entry(entry.task.tenant_id.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn dead_letters(&self) -> Result<Vec<DeadLetter>, QueueError> {
        Ok(self.lock()?.dead.clone())
    }
}

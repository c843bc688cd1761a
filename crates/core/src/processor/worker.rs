//! Handling of a single delivery.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use crate::admission::BackpressureController;
use crate::metrics;
use crate::queue::{load_payload, BlobError, BlobStore, Delivery, QueueError, WorkQueue};
use crate::results::{ResultError, ResultRecord, ResultStore};
use crate::scoring::{Enricher, Scorer, ScorerFactory, ScoringError};

use super::types::{PoolStatus, TaskOutcome};

/// Tracks statistics for the worker pool.
#[derive(Default)]
pub(crate) struct PoolStats {
    pub(crate) live_workers: AtomicU64,
    pub(crate) active: AtomicU64,
    pub(crate) total_completed: AtomicU64,
    pub(crate) total_failed: AtomicU64,
    pub(crate) total_retried: AtomicU64,
    pub(crate) total_dead_lettered: AtomicU64,
    pub(crate) total_superseded: AtomicU64,
}

impl PoolStats {
    pub(crate) fn to_status(&self, running: bool, workers: usize) -> PoolStatus {
        PoolStatus {
            running,
            workers,
            live_workers: self.live_workers.load(Ordering::Relaxed) as usize,
            active_tasks: self.active.load(Ordering::Relaxed) as usize,
            total_completed: self.total_completed.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_retried: self.total_retried.load(Ordering::Relaxed),
            total_dead_lettered: self.total_dead_lettered.load(Ordering::Relaxed),
            total_superseded: self.total_superseded.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Completed => &self.total_completed,
            TaskOutcome::Failed => &self.total_failed,
            TaskOutcome::DeadLettered => {
                self.total_failed.fetch_add(1, Ordering::Relaxed);
                &self.total_dead_lettered
            }
            TaskOutcome::Retried => &self.total_retried,
            TaskOutcome::Skipped => &self.total_superseded,
            TaskOutcome::LeaseLost => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Everything a worker needs, shared by all workers. Holds no scoring state.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub(crate) queue: Arc<dyn WorkQueue>,
    pub(crate) results: Arc<dyn ResultStore>,
    pub(crate) blobs: Arc<dyn BlobStore>,
    pub(crate) controller: BackpressureController,
    pub(crate) enricher: Enricher,
    pub(crate) max_attempts: u32,
    pub(crate) receive_wait: Duration,
    pub(crate) stats: Arc<PoolStats>,
}

/// Result of the scoring step.
enum Verdict {
    Scored(f64),
    Rejected(ScoringError),
    Panicked(String),
}

/// One worker: a context plus the scorer it owns.
pub(crate) struct Worker {
    id: usize,
    ctx: WorkerContext,
    factory: ScorerFactory,
    scorer: Box<dyn Scorer>,
}

impl Worker {
    pub(crate) fn new(id: usize, ctx: WorkerContext, factory: ScorerFactory) -> Self {
        let scorer = factory();
        Self {
            id,
            ctx,
            factory,
            scorer,
        }
    }

    pub(crate) fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Process one delivery through to ack, nack or dead-letter.
    pub(crate) async fn handle(&mut self, delivery: Delivery) -> TaskOutcome {
        self.ctx.stats.active.fetch_add(1, Ordering::Relaxed);
        let outcome = self.process(delivery).await;
        self.ctx.stats.active.fetch_sub(1, Ordering::Relaxed);

        self.ctx.stats.record(outcome);
        if outcome != TaskOutcome::LeaseLost {
            metrics::TASKS_PROCESSED
                .with_label_values(&[outcome.as_str()])
                .inc();
        }
        outcome
    }

    async fn process(&mut self, delivery: Delivery) -> TaskOutcome {
        let Delivery { task, lease } = delivery;

        let current = match self.ctx.results.get(&task.tenant_id, &task.conversation_id) {
            Ok(current) => current,
            Err(e) => {
                error!(task_id = %task.task_id, error = %e, "Failed to read result record");
                return self.retry(&lease).await;
            }
        };

        let current = match current {
            Some(record) if record.task_id != task.task_id || record.status.is_terminal() => {
                debug!(
                    worker = self.id,
                    task_id = %task.task_id,
                    owner = %record.task_id,
                    status = %record.status,
                    "Dropping task with nothing left to do"
                );
                return self.finish(&lease, &task.tenant_id, TaskOutcome::Skipped).await;
            }
            Some(record) => record,
            None => ResultRecord::pending(&task.tenant_id, &task.conversation_id, &task.task_id),
        };

        if task.attempt_count >= self.ctx.max_attempts {
            return self.dead_letter(&lease, &task.tenant_id, &current).await;
        }

        if let Some(outcome) = self.write(&lease, &task.tenant_id, current.to_processing()).await {
            return outcome;
        }
        debug!(worker = self.id, task_id = %task.task_id, attempt = task.attempt_count, "Processing task");

        let text = match load_payload(&task.payload, self.ctx.blobs.as_ref()).await {
            Ok(text) => text,
            Err(BlobError::Io(e)) => {
                warn!(task_id = %task.task_id, error = %e, "Failed to read payload");
                return self.retry(&lease).await;
            }
            Err(e) => {
                let failed = current.to_failed(format!("payload unavailable: {}", e));
                return self.conclude(&lease, &task.tenant_id, failed, TaskOutcome::Failed).await;
            }
        };

        let (record, outcome) = match self.score(&text) {
            Verdict::Scored(score) => {
                let enrichment = self.ctx.enricher.enrich(&text);
                (
                    current.to_completed(score, enrichment.summary, enrichment.tags),
                    TaskOutcome::Completed,
                )
            }
            Verdict::Rejected(e) => {
                warn!(task_id = %task.task_id, error = %e, "Scoring failed");
                (current.to_failed(e.to_string()), TaskOutcome::Failed)
            }
            Verdict::Panicked(message) => {
                error!(
                    worker = self.id,
                    task_id = %task.task_id,
                    attempt = task.attempt_count,
                    panic = %message,
                    "Scorer panicked, task will be redelivered"
                );
                // Start the next task from a fresh scorer.
                self.scorer = (self.factory)();
                return self.retry(&lease).await;
            }
        };

        self.conclude(&lease, &task.tenant_id, record, outcome).await
    }

    fn score(&mut self, text: &str) -> Verdict {
        let started = Instant::now();
        let scorer = &mut self.scorer;
        let result = panic::catch_unwind(AssertUnwindSafe(|| scorer.score(text)));

        let (verdict, label) = match result {
            Ok(Ok(score)) if score.is_finite() => (Verdict::Scored(score), "ok"),
            Ok(Ok(score)) => (Verdict::Rejected(ScoringError::NotFinite(score)), "error"),
            Ok(Err(e)) => (Verdict::Rejected(e), "error"),
            Err(payload) => (Verdict::Panicked(panic_message(payload.as_ref())), "panic"),
        };
        metrics::SCORING_DURATION
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());
        verdict
    }

    /// Write an intermediate record. Returns an outcome when the task must stop here.
    async fn write(
        &self,
        lease: &crate::queue::Lease,
        tenant_id: &str,
        record: ResultRecord,
    ) -> Option<TaskOutcome> {
        let conversation_id = record.conversation_id.clone();
        match self.ctx.results.put(tenant_id, &conversation_id, record) {
            Ok(()) => None,
            Err(ResultError::Storage(e)) => {
                error!(tenant_id = %tenant_id, conversation_id = %conversation_id, error = %e, "Failed to write result");
                Some(self.retry(lease).await)
            }
            Err(e) => {
                // Another task took over, or the record is already final.
                debug!(tenant_id = %tenant_id, conversation_id = %conversation_id, error = %e, "Result write refused");
                Some(self.finish(lease, tenant_id, TaskOutcome::Skipped).await)
            }
        }
    }

    /// Write the final record and acknowledge.
    async fn conclude(
        &self,
        lease: &crate::queue::Lease,
        tenant_id: &str,
        record: ResultRecord,
        outcome: TaskOutcome,
    ) -> TaskOutcome {
        if let Some(stopped) = self.write(lease, tenant_id, record).await {
            return stopped;
        }
        self.finish(lease, tenant_id, outcome).await
    }

    async fn dead_letter(
        &self,
        lease: &crate::queue::Lease,
        tenant_id: &str,
        current: &ResultRecord,
    ) -> TaskOutcome {
        let reason = format!("exceeded {} attempts", self.ctx.max_attempts);
        warn!(
            tenant_id = %tenant_id,
            conversation_id = %current.conversation_id,
            task_id = %lease.task_id,
            "Dead-lettering task: {}",
            reason
        );

        if let Some(stopped) = self.write(lease, tenant_id, current.to_failed(&reason)).await {
            return stopped;
        }

        match self.ctx.queue.dead_letter(lease, &reason).await {
            Ok(()) => {
                self.ctx.controller.release(tenant_id);
                TaskOutcome::DeadLettered
            }
            Err(e) => self.lease_error(lease, e),
        }
    }

    /// Acknowledge and give back the admission slot.
    ///
    /// The slot is released only when the ack lands, so a task that is
    /// delivered twice releases once.
    async fn finish(
        &self,
        lease: &crate::queue::Lease,
        tenant_id: &str,
        outcome: TaskOutcome,
    ) -> TaskOutcome {
        match self.ctx.queue.ack(lease).await {
            Ok(()) => {
                self.ctx.controller.release(tenant_id);
                outcome
            }
            Err(e) => self.lease_error(lease, e),
        }
    }

    async fn retry(&self, lease: &crate::queue::Lease) -> TaskOutcome {
        metrics::TASK_RETRIES.inc();
        match self.ctx.queue.nack(lease).await {
            Ok(()) => TaskOutcome::Retried,
            Err(e) => self.lease_error(lease, e),
        }
    }

    fn lease_error(&self, lease: &crate::queue::Lease, err: QueueError) -> TaskOutcome {
        match err {
            QueueError::LeaseLost { .. } => {
                warn!(worker = self.id, task_id = %lease.task_id, "Lease expired before the task was settled");
            }
            other => {
                error!(worker = self.id, task_id = %lease.task_id, error = %other, "Queue operation failed");
            }
        }
        TaskOutcome::LeaseLost
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::AdmissionConfig;
    use crate::queue::{
        MemoryBlobStore, MemoryWorkQueue, ProcessingTask, QueueStats, TaskPayload,
    };
    use crate::results::{MemoryResultStore, ResultStatus};
    use crate::scoring::scorer_factory;
    use crate::testing::MockScorer;

    struct Harness {
        worker: Worker,
        queue: Arc<MemoryWorkQueue>,
        results: Arc<MemoryResultStore>,
        controller: BackpressureController,
        scorer: MockScorer,
    }

    fn harness(max_attempts: u32) -> Harness {
        let queue = Arc::new(MemoryWorkQueue::new(Duration::from_secs(30)));
        let results = Arc::new(MemoryResultStore::new());
        let controller = BackpressureController::new(AdmissionConfig::default());
        let scorer = MockScorer::new(0.9);
        let ctx = WorkerContext {
            queue: queue.clone(),
            results: results.clone(),
            blobs: Arc::new(MemoryBlobStore::new()),
            controller: controller.clone(),
            enricher: Enricher::default(),
            max_attempts,
            receive_wait: Duration::ZERO,
            stats: Arc::new(PoolStats::default()),
        };
        Harness {
            worker: Worker::new(0, ctx, scorer_factory(scorer.clone())),
            queue,
            results,
            controller,
            scorer,
        }
    }

    /// Admit a task the way the coordinator does.
    async fn admit(h: &Harness, conversation_id: &str, text: &str) -> ProcessingTask {
        assert_eq!(h.controller.admit("t1"), crate::admission::Admission::Allow);
        let task = ProcessingTask::new(
            "t1",
            conversation_id,
            TaskPayload::Inline {
                text: text.to_string(),
            },
        );
        h.results
            .put(
                "t1",
                conversation_id,
                ResultRecord::pending("t1", conversation_id, &task.task_id),
            )
            .unwrap();
        h.queue.enqueue(task.clone()).await.unwrap();
        task
    }

    async fn deliver(h: &mut Harness) -> TaskOutcome {
        let delivery = h.queue.receive(Duration::ZERO).await.unwrap().unwrap();
        h.worker.handle(delivery).await
    }

    #[tokio::test]
    async fn test_completes_and_enriches() {
        let mut h = harness(5);
        admit(&h, "c1", "talk about money").await;

        assert_eq!(deliver(&mut h).await, TaskOutcome::Completed);

        let record = h.results.get("t1", "c1").unwrap().unwrap();
        assert_eq!(record.status, ResultStatus::Completed);
        assert_eq!(record.sentiment_score, Some(0.9));
        assert_eq!(record.summary.as_deref(), Some("Processed text length 16."));
        assert_eq!(record.tags, vec!["finance", "risk"]);
        assert_eq!(h.controller.in_flight(), 0);
        assert_eq!(h.queue.stats().await.unwrap(), QueueStats::default());
    }

    #[tokio::test]
    async fn test_scoring_error_fails_permanently() {
        let mut h = harness(5);
        h.scorer.fail_next(1, "model rejected input");
        admit(&h, "c1", "x").await;

        assert_eq!(deliver(&mut h).await, TaskOutcome::Failed);

        let record = h.results.get("t1", "c1").unwrap().unwrap();
        assert_eq!(record.status, ResultStatus::Failed);
        assert!(record.error.unwrap().contains("model rejected input"));
        assert_eq!(h.controller.in_flight(), 0);
        assert!(h.queue.receive(Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_panic_is_retried() {
        let mut h = harness(5);
        h.scorer.panic_next(1);
        admit(&h, "c1", "x").await;

        assert_eq!(deliver(&mut h).await, TaskOutcome::Retried);
        let record = h.results.get("t1", "c1").unwrap().unwrap();
        assert_eq!(record.status, ResultStatus::Processing);
        assert_eq!(h.controller.in_flight(), 1);

        assert_eq!(deliver(&mut h).await, TaskOutcome::Completed);
        assert_eq!(h.controller.in_flight(), 0);
        assert_eq!(h.scorer.calls(), 2);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_dead_letter() {
        let mut h = harness(2);
        h.scorer.panic_next(10);
        admit(&h, "c1", "x").await;

        assert_eq!(deliver(&mut h).await, TaskOutcome::Retried);
        assert_eq!(deliver(&mut h).await, TaskOutcome::Retried);
        assert_eq!(deliver(&mut h).await, TaskOutcome::DeadLettered);

        let record = h.results.get("t1", "c1").unwrap().unwrap();
        assert_eq!(record.status, ResultStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("exceeded 2 attempts"));
        assert_eq!(h.scorer.calls(), 2);
        assert_eq!(h.controller.in_flight(), 0);
        assert_eq!(h.queue.dead_letters().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_superseded_task_is_dropped() {
        let mut h = harness(5);
        let stale = admit(&h, "c1", "first").await;
        let fresh = admit(&h, "c1", "second").await;
        assert_eq!(h.controller.in_flight(), 2);

        assert_eq!(deliver(&mut h).await, TaskOutcome::Skipped);
        assert_eq!(h.scorer.calls(), 0);
        assert_eq!(h.controller.in_flight(), 1);

        assert_eq!(deliver(&mut h).await, TaskOutcome::Completed);
        let record = h.results.get("t1", "c1").unwrap().unwrap();
        assert_eq!(record.task_id, fresh.task_id);
        assert_ne!(record.task_id, stale.task_id);
        assert_eq!(h.controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_redelivery_of_finished_task_only_acks() {
        let mut h = harness(5);
        let task = admit(&h, "c1", "x").await;

        // Simulate a worker that wrote the result but died before acking.
        let delivery = h.queue.receive(Duration::ZERO).await.unwrap().unwrap();
        let pending = h.results.get("t1", "c1").unwrap().unwrap();
        h.results
            .put(
                "t1",
                "c1",
                pending.to_processing().to_completed(0.1, String::new(), vec![]),
            )
            .unwrap();
        h.queue.nack(&delivery.lease).await.unwrap();

        assert_eq!(deliver(&mut h).await, TaskOutcome::Skipped);
        let record = h.results.get("t1", "c1").unwrap().unwrap();
        assert_eq!(record.task_id, task.task_id);
        assert_eq!(record.sentiment_score, Some(0.1));
        assert_eq!(h.scorer.calls(), 0);
        assert_eq!(h.controller.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_non_finite_score_fails() {
        let mut h = harness(5);
        h.scorer.set_score(f64::NAN);
        admit(&h, "c1", "x").await;

        assert_eq!(deliver(&mut h).await, TaskOutcome::Failed);
        let record = h.results.get("t1", "c1").unwrap().unwrap();
        assert_eq!(record.status, ResultStatus::Failed);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}

//! Wires the components together from a [`Config`].

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::admission::{AdmissionStatus, BackpressureController};
use crate::config::Config;
use crate::ingest::IngestionCoordinator;
use crate::processor::{PoolStatus, WorkerError, WorkerPool};
use crate::queue::{
    BlobError, BlobStore, FsBlobStore, MemoryBlobStore, MemoryWorkQueue, QueueBackend,
    QueueError, QueueStats, SqliteWorkQueue, WorkQueue,
};
use crate::results::{MemoryResultStore, ResultError, ResultStore, ResultsBackend, SqliteResultStore};
use crate::scoring::{Enricher, ScorerFactory};

/// Errors from building or running the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Failed to open work queue: {0}")]
    Queue(#[from] QueueError),

    #[error("Failed to open result store: {0}")]
    Results(#[from] ResultError),

    #[error("Failed to open blob store: {0}")]
    Blobs(#[from] BlobError),

    #[error("Worker pool error: {0}")]
    Workers(#[from] WorkerError),
}

/// Snapshot of the whole pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub admission: AdmissionStatus,
    pub queue: QueueStats,
    pub workers: PoolStatus,
}

/// The assembled pipeline: coordinator on the request side, worker pool on
/// the processing side, sharing one queue, result store and controller.
pub struct Pipeline {
    controller: BackpressureController,
    queue: Arc<dyn WorkQueue>,
    results: Arc<dyn ResultStore>,
    coordinator: IngestionCoordinator,
    workers: WorkerPool,
}

impl Pipeline {
    /// Build every backend named by `config`. Workers are not started.
    ///
    /// Tasks already in a durable queue are counted as in flight before the
    /// pipeline accepts anything new.
    pub async fn from_config(
        config: &Config,
        scorer: ScorerFactory,
    ) -> Result<Self, PipelineError> {
        let queue: Arc<dyn WorkQueue> = match config.queue.backend {
            QueueBackend::Memory => {
                Arc::new(MemoryWorkQueue::new(config.queue.visibility_timeout()))
            }
            QueueBackend::Sqlite => Arc::new(SqliteWorkQueue::new(
                &config.database.path,
                config.queue.visibility_timeout(),
                config.queue.poll_interval(),
            )?),
        };

        let results: Arc<dyn ResultStore> = match config.results.backend {
            ResultsBackend::Memory => Arc::new(MemoryResultStore::new()),
            ResultsBackend::Sqlite => Arc::new(SqliteResultStore::new(&config.database.path)?),
        };

        let blobs: Arc<dyn BlobStore> = match &config.queue.blob_dir {
            Some(dir) => Arc::new(FsBlobStore::new(dir.clone())?),
            None => Arc::new(MemoryBlobStore::new()),
        };

        info!(
            queue = queue.name(),
            results = results.name(),
            blobs = blobs.name(),
            "Pipeline backends ready"
        );

        let pipeline = Self::with_backends(config, queue, results, blobs, scorer);
        pipeline.restore_in_flight().await?;
        Ok(pipeline)
    }

    /// Assemble the pipeline around existing backends.
    pub fn with_backends(
        config: &Config,
        queue: Arc<dyn WorkQueue>,
        results: Arc<dyn ResultStore>,
        blobs: Arc<dyn BlobStore>,
        scorer: ScorerFactory,
    ) -> Self {
        let controller = BackpressureController::new(config.admission.clone());

        let coordinator = IngestionCoordinator::new(
            controller.clone(),
            Arc::clone(&queue),
            Arc::clone(&results),
            Arc::clone(&blobs),
        )
        .with_decoder_config(config.decoder.clone())
        .with_inline_payload_max(config.queue.inline_payload_max_bytes);

        let workers = WorkerPool::new(
            config.processor.clone(),
            Arc::clone(&queue),
            Arc::clone(&results),
            blobs,
            controller.clone(),
            Enricher::new(&config.scoring),
            scorer,
        );

        Self {
            controller,
            queue,
            results,
            coordinator,
            workers,
        }
    }

    /// Seed the admission counters with the tasks the queue already holds.
    ///
    /// Returns the number of tasks restored. Call once, before submitting.
    pub async fn restore_in_flight(&self) -> Result<usize, PipelineError> {
        let counts = self.queue.in_flight_by_tenant().await?;
        let mut restored = 0;
        for (tenant, n) in counts {
            self.controller.restore(&tenant, n);
            restored += n;
        }
        if restored > 0 {
            info!(restored, "Queued tasks counted as in flight");
        }
        Ok(restored)
    }

    /// Start the worker pool.
    pub fn start(&self) -> Result<(), PipelineError> {
        self.workers.start()?;
        Ok(())
    }

    /// Stop the worker pool, letting in-progress tasks finish.
    ///
    /// Queued tasks stay queued; with a durable queue they are picked up on
    /// the next start.
    pub async fn shutdown(&self) {
        self.workers.shutdown().await;
    }

    pub async fn status(&self) -> Result<PipelineStatus, PipelineError> {
        Ok(PipelineStatus {
            admission: self.controller.status(),
            queue: self.queue.stats().await?,
            workers: self.workers.status(),
        })
    }

    pub fn coordinator(&self) -> &IngestionCoordinator {
        &self.coordinator
    }

    pub fn results(&self) -> &Arc<dyn ResultStore> {
        &self.results
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    pub fn controller(&self) -> &BackpressureController {
        &self.controller
    }
}

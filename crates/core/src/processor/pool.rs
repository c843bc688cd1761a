//! Worker pool: one OS thread and runtime per worker.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::admission::BackpressureController;
use crate::queue::{BlobStore, WorkQueue};
use crate::results::ResultStore;
use crate::scoring::{Enricher, ScorerFactory};

use super::config::ProcessorConfig;
use super::types::PoolStatus;
use super::worker::{panic_message, PoolStats, Worker, WorkerContext};

/// Errors from the worker pool.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker pool needs at least one worker")]
    NoWorkers,
}

/// Pulls tasks from the queue and scores them.
///
/// Every worker runs on its own thread with its own single-threaded runtime
/// and its own scorer, so a slow or panicking scorer only ever stalls the
/// worker that owns it.
pub struct WorkerPool {
    config: ProcessorConfig,
    ctx: WorkerContext,
    factory: ScorerFactory,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        config: ProcessorConfig,
        queue: Arc<dyn WorkQueue>,
        results: Arc<dyn ResultStore>,
        blobs: Arc<dyn BlobStore>,
        controller: BackpressureController,
        enricher: Enricher,
        factory: ScorerFactory,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let ctx = WorkerContext {
            queue,
            results,
            blobs,
            controller,
            enricher,
            max_attempts: config.retry.max_attempts,
            receive_wait: config.receive_wait(),
            stats: Arc::new(PoolStats::default()),
        };

        Self {
            config,
            ctx,
            factory,
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the worker threads.
    pub fn start(&self) -> Result<(), WorkerError> {
        if self.config.workers == 0 {
            return Err(WorkerError::NoWorkers);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Worker pool already running");
            return Ok(());
        }

        info!(workers = self.config.workers, "Starting worker pool");

        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        for id in 0..self.config.workers {
            let worker = Worker::new(id, self.ctx.clone(), Arc::clone(&self.factory));
            let shutdown_rx = self.shutdown_tx.subscribe();
            let spawned = std::thread::Builder::new()
                .name(format!("parley-worker-{}", id))
                .spawn(move || run_worker(worker, shutdown_rx));

            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    error!(worker = id, error = %e, "Failed to spawn worker");
                    drop(handles);
                    self.stop_threads();
                    return Err(WorkerError::Spawn(e));
                }
            }
        }

        info!("Worker pool started");
        Ok(())
    }

    /// Signal every worker and wait for them to finish their current task.
    pub async fn shutdown(&self) {
        if !self.running.load(Ordering::SeqCst) {
            debug!("Worker pool not running");
            return;
        }

        info!("Stopping worker pool");
        let handles = self.signal_stop();
        let joined = tokio::task::spawn_blocking(move || join_all(handles)).await;
        if let Err(e) = joined {
            error!(error = %e, "Failed to join worker threads");
        }
        info!("Worker pool stopped");
    }

    pub fn status(&self) -> PoolStatus {
        self.ctx
            .stats
            .to_status(self.running.load(Ordering::Relaxed), self.config.workers)
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    fn signal_stop(&self) -> Vec<JoinHandle<()>> {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.shutdown_tx.send(());
        let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *handles)
    }

    fn stop_threads(&self) {
        join_all(self.signal_stop());
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.running.load(Ordering::SeqCst) {
            // Threads are detached; they exit at their next shutdown check.
            let _ = self.signal_stop();
        }
    }
}

fn join_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if handle.join().is_err() {
            error!("Worker thread exited with a panic");
        }
    }
}

fn run_worker(mut worker: Worker, mut shutdown_rx: broadcast::Receiver<()>) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build worker runtime");
            return;
        }
    };

    let stats = Arc::clone(&worker.context().stats);
    stats.live_workers.fetch_add(1, Ordering::Relaxed);

    runtime.block_on(async move {
        debug!("Worker loop started");
        let queue = Arc::clone(&worker.context().queue);
        let wait = worker.context().receive_wait;

        loop {
            let delivery = tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!("Worker loop received shutdown signal");
                    break;
                }
                received = queue.receive(wait) => received,
            };

            match delivery {
                Ok(Some(delivery)) => {
                    let task_id = delivery.task.task_id.clone();
                    let handled = AssertUnwindSafe(worker.handle(delivery)).catch_unwind().await;
                    if let Err(payload) = handled {
                        // The lease is left to expire so the task is redelivered.
                        error!(
                            task_id = %task_id,
                            panic = %panic_message(payload.as_ref()),
                            "Worker panicked while handling task"
                        );
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %e, "Failed to receive from queue");
                    tokio::time::sleep(wait.max(std::time::Duration::from_millis(10))).await;
                }
            }
        }
        debug!("Worker loop stopped");
    });

    stats.live_workers.fetch_sub(1, Ordering::Relaxed);
}

//! Ingestion coordinator implementation.

use std::fmt::Display;
use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::admission::{AdmissionPermit, BackpressureController};
use crate::decoder::{DecoderConfig, Framing, RecordDecoder, RecordStream};
use crate::metrics;
use crate::queue::{store_payload, BlobStore, ProcessingTask, WorkQueue};
use crate::results::{ResultError, ResultRecord, ResultStatus, ResultStore};
use crate::transcript::TranscriptRecord;

use super::types::{Accepted, IngestReport, Rejection, SubmitError};

/// Turns raw records into queued tasks.
///
/// Validates, asks the backpressure controller for a slot, records the
/// conversation as `PENDING` and enqueues the task. Never waits on scoring.
#[derive(Clone)]
pub struct IngestionCoordinator {
    controller: BackpressureController,
    queue: Arc<dyn WorkQueue>,
    results: Arc<dyn ResultStore>,
    blobs: Arc<dyn BlobStore>,
    decoder_config: DecoderConfig,
    inline_payload_max: usize,
}

impl IngestionCoordinator {
    pub fn new(
        controller: BackpressureController,
        queue: Arc<dyn WorkQueue>,
        results: Arc<dyn ResultStore>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            controller,
            queue,
            results,
            blobs,
            decoder_config: DecoderConfig::default(),
            inline_payload_max: 64 * 1024,
        }
    }

    /// Sets the decoder limits used by [`ingest`](Self::ingest).
    pub fn with_decoder_config(mut self, config: DecoderConfig) -> Self {
        self.decoder_config = config;
        self
    }

    /// Sets the size above which text goes to the blob store.
    pub fn with_inline_payload_max(mut self, max: usize) -> Self {
        self.inline_payload_max = max;
        self
    }

    /// Submit one raw record for `tenant_id`.
    ///
    /// The only wait is the admission decision. If the caller gives up while
    /// waiting for admission nothing is created; once admitted, the record and
    /// its task are created even if the caller goes away.
    pub async fn submit(&self, tenant_id: &str, raw: Value) -> Result<Accepted, SubmitError> {
        let result = self.submit_inner(tenant_id, raw).await;
        let outcome = match &result {
            Ok(_) => "accepted",
            Err(e) => e.kind(),
        };
        metrics::SUBMISSIONS_TOTAL
            .with_label_values(&[outcome])
            .inc();
        result
    }

    async fn submit_inner(&self, tenant_id: &str, raw: Value) -> Result<Accepted, SubmitError> {
        let record = TranscriptRecord::from_value(tenant_id, raw)?;
        let permit = self.controller.acquire(tenant_id).await?;

        // Past admission the work runs to completion on its own task, so a
        // dropped caller cannot leave a PENDING record without a queued task.
        let this = self.clone();
        tokio::spawn(async move { this.admit(record, permit).await })
            .await
            .map_err(|e| SubmitError::Internal(format!("submission task failed: {}", e)))?
    }

    async fn admit(
        &self,
        record: TranscriptRecord,
        permit: AdmissionPermit,
    ) -> Result<Accepted, SubmitError> {
        let TranscriptRecord {
            conversation_id,
            tenant_id,
            text,
            metadata,
        } = record;

        let task_id = uuid::Uuid::new_v4().to_string();
        let pending = ResultRecord::pending(&tenant_id, &conversation_id, &task_id);
        match self
            .results
            .put(&tenant_id, &conversation_id, pending.clone())
        {
            Ok(()) => {}
            Err(err @ ResultError::InFlight { .. }) => {
                debug!(tenant_id = %tenant_id, conversation_id = %conversation_id, "Re-submission while processing");
                return Err(SubmitError::Conflict(err));
            }
            Err(err) => {
                error!(tenant_id = %tenant_id, conversation_id = %conversation_id, error = %err, "Failed to record pending result");
                return Err(SubmitError::Internal(err.to_string()));
            }
        }

        // Blobs are written only for conversations this task now owns.
        let payload = match store_payload(text, self.inline_payload_max, self.blobs.as_ref()).await {
            Ok(payload) => payload,
            Err(err) => {
                error!(tenant_id = %tenant_id, task_id = %task_id, error = %err, "Failed to store payload");
                self.abandon(&pending, format!("payload store failed: {}", err));
                return Err(SubmitError::Internal(err.to_string()));
            }
        };
        let task = ProcessingTask::new(&tenant_id, &conversation_id, payload)
            .with_task_id(&task_id)
            .with_metadata(metadata);

        if let Err(err) = self.queue.enqueue(task).await {
            error!(tenant_id = %tenant_id, task_id = %task_id, error = %err, "Failed to enqueue task");
            self.abandon(&pending, format!("enqueue failed: {}", err));
            return Err(SubmitError::Internal(err.to_string()));
        }

        permit.commit();
        debug!(tenant_id = %tenant_id, conversation_id = %conversation_id, task_id = %task_id, "Task admitted");

        Ok(Accepted {
            conversation_id,
            task_id,
            status: ResultStatus::Pending,
        })
    }

    /// Mark a pending record failed when its task never reaches the queue.
    fn abandon(&self, pending: &ResultRecord, reason: String) {
        if let Err(err) = self.results.put(
            &pending.tenant_id,
            &pending.conversation_id,
            pending.to_failed(reason),
        ) {
            warn!(task_id = %pending.task_id, error = %err, "Failed to mark unqueued task as failed");
        }
    }

    /// Decode a byte stream and submit every record in it, in order.
    ///
    /// Bad elements are reported and skipped. A framing or read error stops
    /// the stream; records admitted before it stay admitted.
    pub async fn ingest<S, B, E>(&self, tenant_id: &str, body: S, framing: Framing) -> IngestReport
    where
        S: Stream<Item = Result<B, E>> + Unpin,
        B: AsRef<[u8]>,
        E: Display,
    {
        let decoder = RecordDecoder::new(framing, &self.decoder_config);
        let mut records = RecordStream::new(body, decoder);
        let mut report = IngestReport::default();

        while let Some(item) = records.next().await {
            metrics::RECORDS_DECODED.inc();

            let element = match item {
                Ok(element) => element,
                Err(err) => {
                    metrics::DECODE_ERRORS.with_label_values(&[err.kind()]).inc();
                    if err.is_terminal() {
                        warn!(tenant_id = %tenant_id, error = %err, "Ingestion stream broken");
                        report.terminal_error = Some(err.to_string());
                        break;
                    }
                    debug!(tenant_id = %tenant_id, error = %err, "Skipping undecodable element");
                    report.rejected.push(Rejection::from_decode(&err));
                    continue;
                }
            };

            let conversation_id = element
                .value
                .get("conversation_id")
                .and_then(Value::as_str)
                .map(str::to_string);

            match self.submit(tenant_id, element.value).await {
                Ok(accepted) => report.accepted.push(accepted),
                Err(err) => {
                    debug!(tenant_id = %tenant_id, index = element.index, error = %err, "Record rejected");
                    report
                        .rejected
                        .push(Rejection::from_submit(element.index, conversation_id, &err));
                }
            }
        }

        report.position = Some(records.decoder().position());
        report
    }
}

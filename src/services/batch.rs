//! Batch driver: runs the processor over a batch of queue records one at a
//! time and summarizes the outcome. A failing record never stops the rest of
//! the batch.

use crate::{
    models::media_job::QueueRecord,
    services::{
        processor::{ProcessOutcome, Processor},
        queue::JobQueue,
    },
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub message_id: Option<String>,
    pub error: String,
    pub error_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub results: Vec<ProcessOutcome>,
    pub failures: Vec<BatchFailure>,
    /// Wall time for the whole batch, in milliseconds.
    pub execution_time: u64,
}

/// Queue-triggered invocation payload. Records stay raw so one bad entry
/// fails alone instead of failing the envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchEvent {
    #[serde(rename = "Records")]
    pub records: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationResponse {
    pub status_code: u16,
    pub body: Value,
}

impl InvocationResponse {
    /// Response for an envelope that could not be read.
    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        Self {
            status_code: 500,
            body: json!({
                "error": format!("malformed batch event: {}", reason),
                "errorType": "MalformedEventError",
            }),
        }
    }
}

/// Polling settings for [`BatchDriver::run_worker`].
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub batch_size: usize,
    pub poll_interval: Duration,
}

#[derive(Clone)]
pub struct BatchDriver {
    processor: Arc<Processor>,
}

impl BatchDriver {
    pub fn new(processor: Arc<Processor>) -> Self {
        Self { processor }
    }

    pub async fn handle_batch(&self, records: &[QueueRecord]) -> BatchSummary {
        let started = Instant::now();
        info!(message_count = records.len(), "processing batch");

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for record in records {
            match self.processor.process(record).await {
                Ok(outcome) => results.push(outcome),
                Err(err) => failures.push(BatchFailure {
                    message_id: record.message_id.clone(),
                    error: err.to_string(),
                    error_type: err.kind().to_string(),
                }),
            }
        }

        let summary = BatchSummary {
            processed: results.len(),
            failed: failures.len(),
            results,
            failures,
            execution_time: started.elapsed().as_millis() as u64,
        };
        info!(
            processed = summary.processed,
            failed = summary.failed,
            execution_time_ms = summary.execution_time,
            "batch processing complete"
        );
        summary
    }

    /// Entry point for a raw invocation event. Only an unreadable envelope
    /// yields a non-200 status; per-record failures are in the body.
    pub async fn handle_event(&self, event: Value) -> InvocationResponse {
        let event: BatchEvent = match serde_json::from_value(event) {
            Ok(event) => event,
            Err(err) => {
                error!(error = %err, "malformed batch event");
                return InvocationResponse::malformed(err);
            }
        };

        let records: Vec<QueueRecord> = event
            .records
            .iter()
            .map(QueueRecord::from_event_record)
            .collect();
        let summary = self.handle_batch(&records).await;
        match serde_json::to_value(&summary) {
            Ok(body) => InvocationResponse {
                status_code: 200,
                body,
            },
            Err(err) => InvocationResponse {
                status_code: 500,
                body: json!({ "error": err.to_string(), "errorType": "SerializationError" }),
            },
        }
    }

    /// Poll `queue` and process what arrives until `shutdown` fires.
    pub async fn run_worker(
        &self,
        queue: Arc<dyn JobQueue>,
        settings: WorkerSettings,
        shutdown: CancellationToken,
    ) {
        info!(
            batch_size = settings.batch_size,
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            "queue worker started"
        );

        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = queue.receive(settings.batch_size) => received,
            };

            match received {
                Ok(messages) if !messages.is_empty() => {
                    for redelivered in messages.iter().filter(|m| m.receive_count > 1) {
                        debug!(
                            message_id = %redelivered.message_id,
                            receive_count = redelivered.receive_count,
                            "redelivered message"
                        );
                    }
                    let records: Vec<QueueRecord> = messages.into_iter().map(Into::into).collect();
                    let span = info_span!("queue_batch", size = records.len());
                    self.handle_batch(&records).instrument(span).await;
                    continue;
                }
                Ok(_) => {}
                Err(err) => warn!(error = %err, "queue receive failed"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(settings.poll_interval) => {}
            }
        }

        info!("queue worker stopped");
    }
}

//! Egress stage: push one queued photo to the media API and settle its blob,
//! ledger record and queue message.
//!
//! Success moves the blob to `processed/`, marks the record COMPLETED and
//! acknowledges the message. Any failure after the body parses marks the
//! record FAILED, moves the blob to `errors/` and returns the error without
//! acknowledging, so the queue redelivers it.

use crate::{
    errors::{PipelineError, PipelineResult},
    models::{
        blob::{BlobLayout, Folder},
        media_job::{FailureTarget, JobDraft, QueueRecord},
        photo_record::PhotoStatus,
    },
    services::{
        blob_store::BlobStore,
        ledger::StatusLedger,
        locations::LocationDirectory,
        media_api::{CreateMediaRequest, MediaApi, MediaCategory, TokenSource},
        queue::JobQueue,
        retry::{RetryPolicy, Retryable, retry, retry_if},
    },
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Collaborators the processor is wired with.
#[derive(Clone)]
pub struct ProcessorContext {
    pub blobs: Arc<dyn BlobStore>,
    /// Should carry the exponential policy.
    pub ledger: StatusLedger,
    pub queue: Arc<dyn JobQueue>,
    pub media: Arc<dyn MediaApi>,
    pub tokens: Arc<dyn TokenSource>,
    pub locations: LocationDirectory,
    pub layout: BlobLayout,
    /// Category every uploaded photo is filed under.
    pub category: MediaCategory,
    pub retry: RetryPolicy,
}

/// Result of a successfully processed message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub success: bool,
    pub file_name: String,
    pub file_key: String,
    pub processed_key: String,
    pub response: Value,
}

#[derive(Clone)]
pub struct Processor {
    ctx: ProcessorContext,
}

impl Processor {
    pub fn new(ctx: ProcessorContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip_all, fields(message_id = record.message_id.as_deref().unwrap_or("-")))]
    pub async fn process(&self, record: &QueueRecord) -> PipelineResult<ProcessOutcome> {
        // Without a parsed body there is nothing to compensate.
        let draft = JobDraft::parse(&record.body)?;

        match self.upload(&draft, record).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                error!(error = %err, error_type = err.kind(), "photo processing failed");
                match draft.failure_target() {
                    Some(target) => self.compensate(&target, &err).await,
                    None => warn!("job lacks fileKey, fileName or storeId, skipping cleanup"),
                }
                Err(err)
            }
        }
    }

    async fn upload(&self, draft: &JobDraft, record: &QueueRecord) -> PipelineResult<ProcessOutcome> {
        let ctx = &self.ctx;
        let job = draft.validate()?;
        if !ctx.layout.is_upload_key(&job.file_key) {
            return Err(PipelineError::validation(format!(
                "fileKey `{}` is not under {}/uploads/",
                job.file_key, ctx.layout.root
            )));
        }
        let location_id = ctx.locations.resolve(&job.store_id).ok_or_else(|| {
            PipelineError::validation(format!("Unknown storeId: {}", job.store_id))
        })?;
        info!(
            file_key = %job.file_key,
            store_id = %job.store_id,
            location_id,
            "processing photo upload"
        );

        let token = retry_if(
            &ctx.retry,
            "media.authenticate",
            || ctx.tokens.access_token(),
            |err: &PipelineError| {
                matches!(err, PipelineError::Authentication(_)) || err.is_transient()
            },
        )
        .await?;

        let request = CreateMediaRequest::photo(
            ctx.category,
            ctx.layout.public_url(&job.file_key),
            &job.file_name,
        );
        let response = ctx.media.create_media(&token, location_id, &request).await?;
        info!(file_key = %job.file_key, "media item created");

        let processed_key = self.move_blob(&job.file_key, Folder::Processed).await?;
        ctx.ledger
            .transition(
                &job.store_id,
                &job.file_name,
                PhotoStatus::Completed,
                Some(response.to_string()),
                None,
            )
            .await?;

        let receipt = record
            .receipt_handle
            .as_deref()
            .ok_or(PipelineError::MissingReceiptHandle)?;
        retry(&ctx.retry, "queue.delete", || ctx.queue.delete(receipt)).await?;
        info!(file_key = %job.file_key, processed_key = %processed_key, "message acknowledged");

        Ok(ProcessOutcome {
            success: true,
            file_name: job.file_name,
            file_key: job.file_key,
            processed_key,
            response,
        })
    }

    /// Copy then delete, each retried on its own. Returns the new key.
    async fn move_blob(&self, file_key: &str, folder: Folder) -> PipelineResult<String> {
        let ctx = &self.ctx;
        let destination = ctx.layout.relocate(file_key, folder).ok_or_else(|| {
            PipelineError::validation(format!("fileKey `{}` cannot be moved to {}", file_key, folder))
        })?;
        let bucket = ctx.layout.bucket.as_str();

        retry(&ctx.retry, "blob.copy", || {
            ctx.blobs.copy(bucket, file_key, &destination)
        })
        .await?;
        retry(&ctx.retry, "blob.delete", || ctx.blobs.delete(bucket, file_key)).await?;

        info!(from = file_key, to = %destination, %folder, "blob moved");
        Ok(destination)
    }

    async fn compensate(&self, target: &FailureTarget, cause: &PipelineError) {
        if let Err(err) = self
            .ctx
            .ledger
            .transition(
                &target.store_id,
                &target.file_name,
                PhotoStatus::Failed,
                None,
                Some(cause.to_string()),
            )
            .await
        {
            error!(
                store_id = %target.store_id,
                file_name = %target.file_name,
                error = %err,
                "failed to mark ledger record as FAILED"
            );
        }

        if let Err(err) = self.move_blob(&target.file_key, Folder::Errors).await {
            error!(
                file_key = %target.file_key,
                error = %err,
                "failed to move blob to errors folder"
            );
        }
    }
}

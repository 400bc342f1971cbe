//! Ingress stage: accept a base64 photo for a store, persist it under
//! `uploads/`, record it as PENDING and enqueue an upload job.
//!
//! Nothing is rolled back here. If the blob is stored but the ledger write or
//! the enqueue fails, the blob (and possibly the record) stay behind.

use crate::{
    errors::{PipelineError, PipelineResult},
    models::{blob::BlobLayout, media_job::MediaJob},
    services::{
        blob_store::BlobStore,
        ledger::StatusLedger,
        queue::JobQueue,
        retry::{RetryPolicy, retry},
    },
};
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use tracing::{info, instrument};

pub const ALLOWED_CONTENT_TYPES: [&str; 2] = ["image/jpeg", "image/png"];
const MAX_SEGMENT_LEN: usize = 255;

/// Inbound photo payload. Every field is required; they are optional here so
/// absence can be reported as a validation failure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    pub file_name: Option<String>,
    /// Base64-encoded image bytes.
    pub file_content: Option<String>,
    pub content_type: Option<String>,
    pub store_id: Option<String>,
}

/// Validated form of [`IngestRequest`].
#[derive(Debug, Clone)]
struct PhotoUpload {
    file_name: String,
    file_content: String,
    content_type: String,
    store_id: String,
}

impl IngestRequest {
    fn into_upload(self) -> PipelineResult<PhotoUpload> {
        fn present(value: Option<String>) -> Option<String> {
            value.filter(|v| !v.trim().is_empty())
        }

        match (
            present(self.file_name),
            present(self.file_content),
            present(self.content_type),
            present(self.store_id),
        ) {
            (Some(file_name), Some(file_content), Some(content_type), Some(store_id)) => {
                ensure_key_segment("storeId", &store_id)?;
                ensure_key_segment("fileName", &file_name)?;
                Ok(PhotoUpload {
                    file_name,
                    file_content,
                    content_type,
                    store_id,
                })
            }
            _ => Err(PipelineError::validation("Missing required parameters")),
        }
    }
}

/// `storeId` and `fileName` each become one segment of the blob key.
fn ensure_key_segment(field: &str, value: &str) -> PipelineResult<()> {
    let invalid = value == "."
        || value == ".."
        || value.len() > MAX_SEGMENT_LEN
        || value.chars().any(|c| c == '/' || c == '\\' || c.is_control());
    if invalid {
        return Err(PipelineError::validation(format!(
            "Invalid {}: {:?}",
            field, value
        )));
    }
    Ok(())
}

/// Accepted image size range and content types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageBounds {
    pub min_bytes: usize,
    pub max_bytes: usize,
}

impl Default for ImageBounds {
    fn default() -> Self {
        Self {
            min_bytes: 10 * 1024,
            max_bytes: 5 * 1024 * 1024,
        }
    }
}

impl ImageBounds {
    pub fn check(&self, content_type: &str, size: usize) -> PipelineResult<()> {
        if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
            return Err(PipelineError::validation(format!(
                "Invalid content type: {}",
                content_type
            )));
        }
        if size > self.max_bytes {
            return Err(PipelineError::validation(format!(
                "File too large: {} bytes (max {} bytes)",
                size, self.max_bytes
            )));
        }
        if size < self.min_bytes {
            return Err(PipelineError::validation(format!(
                "File too small: {} bytes (min {} bytes)",
                size, self.min_bytes
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct IngressService {
    blobs: Arc<dyn BlobStore>,
    ledger: StatusLedger,
    queue: Arc<dyn JobQueue>,
    layout: BlobLayout,
    bounds: ImageBounds,
    retry: RetryPolicy,
}

impl IngressService {
    /// `ledger` should carry the same linear policy as `retry`.
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        ledger: StatusLedger,
        queue: Arc<dyn JobQueue>,
        layout: BlobLayout,
        bounds: ImageBounds,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            blobs,
            ledger,
            queue,
            layout,
            bounds,
            retry,
        }
    }

    /// Store the photo and queue it for upload. Returns the blob key.
    #[instrument(skip_all, fields(store_id, file_name))]
    pub async fn ingest(&self, request: IngestRequest) -> PipelineResult<String> {
        let upload = request.into_upload()?;
        let span = tracing::Span::current();
        span.record("store_id", upload.store_id.as_str());
        span.record("file_name", upload.file_name.as_str());
        info!(content_type = %upload.content_type, "starting photo ingest");

        let file_key = self.layout.upload_key(&upload.store_id, &upload.file_name);
        let decoded = Bytes::from(general_purpose::STANDARD.decode(upload.file_content.trim())?);
        self.bounds.check(&upload.content_type, decoded.len())?;

        let bucket = self.layout.bucket.as_str();
        retry(&self.retry, "blob.put", || {
            self.blobs.put(
                bucket,
                &file_key,
                decoded.clone(),
                Some(upload.content_type.as_str()),
            )
        })
        .await?;
        info!(bucket, file_key = %file_key, "photo stored");

        let timestamp = self
            .ledger
            .create_if_absent(&upload.store_id, &upload.file_name, &file_key)
            .await?;

        let job = MediaJob {
            file_key: file_key.clone(),
            file_name: upload.file_name.clone(),
            store_id: upload.store_id.clone(),
            content_type: upload.content_type.clone(),
            uploaded_at: timestamp,
        };
        let body = serde_json::to_string(&job)?;
        let attributes = HashMap::from([("storeId".to_string(), upload.store_id.clone())]);
        let message_id = retry(&self.retry, "queue.send", || {
            self.queue.send(&body, &attributes)
        })
        .await?;
        info!(message_id = %message_id, file_key = %file_key, "upload job enqueued");

        Ok(file_key)
    }
}

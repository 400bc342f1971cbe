//! HTTP handlers for the two pipeline stages.
//!
//! - `POST /photos` accepts a base64 photo (ingress)
//! - `POST /batch` runs a batch of queue records through the processor
//! - `GET /photos/{storeId}/{fileName}` reports the ledger status of a photo

use crate::{
    errors::AppError,
    models::photo_record::PhotoRecord,
    services::{batch::InvocationResponse, ingress::IngestRequest},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use serde_json::Value;
use tracing::error;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub message: &'static str,
    pub file_key: String,
}

/// `POST /photos`
pub async fn ingest_photo(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::bad_request(rejection.body_text()))?;

    let file_key = state.ingress.ingest(request).await.map_err(|err| {
        error!(error = %err, error_type = err.kind(), "photo ingest failed");
        AppError::from(err)
    })?;

    Ok(Json(IngestResponse {
        message: "File uploaded successfully",
        file_key,
    }))
}

/// `POST /batch`
///
/// Always answers with the invocation envelope; the HTTP status mirrors its
/// `statusCode`.
pub async fn process_batch(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> impl IntoResponse {
    let response = match payload {
        Ok(Json(event)) => state.batch.handle_event(event).await,
        Err(rejection) => InvocationResponse::malformed(rejection.body_text()),
    };
    let status =
        StatusCode::from_u16(response.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoStatusResponse {
    pub store_id: String,
    pub file_name: String,
    pub status: String,
    pub file_key: Option<String>,
    pub upload_timestamp: Option<String>,
    pub completed_at: Option<String>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl From<PhotoRecord> for PhotoStatusResponse {
    fn from(record: PhotoRecord) -> Self {
        // Results are stored as JSON text; anything else is passed through as a string.
        let result = record.result.map(|raw| {
            serde_json::from_str::<Value>(&raw).unwrap_or(Value::String(raw))
        });
        Self {
            store_id: record.store_id,
            file_name: record.file_name,
            status: record.status.to_string(),
            file_key: record.file_key,
            upload_timestamp: record.upload_timestamp,
            completed_at: record.completed_at,
            result,
            error: record.error,
        }
    }
}

/// `GET /photos/{storeId}/{fileName}`
pub async fn photo_status(
    State(state): State<AppState>,
    Path((store_id, file_name)): Path<(String, String)>,
) -> Result<Json<PhotoStatusResponse>, AppError> {
    let record = state
        .ledger
        .lookup(&store_id, &file_name)
        .await?
        .ok_or_else(|| {
            AppError::not_found(format!("no photo `{}` for store `{}`", file_name, store_id))
        })?;
    Ok(Json(record.into()))
}

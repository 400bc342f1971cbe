//! Defines routes for the photo pipeline.
//!
//! ## Structure
//! - **Pipeline endpoints**
//!   - `POST /photos` - accept a base64 photo for upload
//!   - `GET  /photos/{storeId}/{fileName}` - ledger status of a photo
//!   - `POST /batch` - process a batch of queue records
//!
//! - **Blob endpoints**
//!   - `GET  /blobs/{bucket}/{*key}` - download a stored photo
//!   - `HEAD /blobs/{bucket}/{*key}` - retrieve metadata only
//!
//! The wildcard `*key` allows nested keys like `local-seo-photos/uploads/dc/{uuid}-a.jpg`.

use crate::{
    handlers::{
        blob_handlers::{get_blob, head_blob},
        health_handlers::{healthz, readyz},
        photo_handlers::{ingest_photo, photo_status, process_batch},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the router. State is attached by the caller with `with_state`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/photos", post(ingest_photo))
        .route("/photos/{store_id}/{file_name}", get(photo_status))
        .route("/batch", post(process_batch))
        .route("/blobs/{bucket}/{*key}", get(get_blob).head(head_blob))
}

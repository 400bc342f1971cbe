use crate::services::{
    batch::BatchDriver, blob_store::BlobStore, ingress::IngressService, ledger::StatusLedger,
    queue::JobQueue,
};
use sqlx::SqlitePool;
use std::{path::PathBuf, sync::Arc};

/// Shared handler state, built once in `main`.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<SqlitePool>,
    /// Root of on-disk blob storage, probed by `/readyz`.
    pub storage_dir: PathBuf,
    pub blobs: Arc<dyn BlobStore>,
    pub ledger: StatusLedger,
    pub queue: Arc<dyn JobQueue>,
    pub ingress: IngressService,
    pub batch: BatchDriver,
}

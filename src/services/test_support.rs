//! Fully wired pipeline over in-memory SQLite and a temp directory, with the
//! media API and token source left to the caller.

use crate::{
    db,
    models::blob::BlobLayout,
    services::{
        batch::BatchDriver,
        blob_store::DiskBlobStore,
        ingress::{ImageBounds, IngestRequest, IngressService},
        ledger::{SqliteLedgerTable, StatusLedger},
        locations::LocationDirectory,
        media_api::{AccessToken, MediaApi, MediaCategory, MockTokenSource, TokenSource},
        processor::{Processor, ProcessorContext},
        queue::SqliteJobQueue,
        retry::RetryPolicy,
    },
    state::AppState,
};
use base64::{Engine as _, engine::general_purpose};
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use tempfile::TempDir;

pub const BUCKET: &str = "street-lawyer-services";
pub const ROOT: &str = "local-seo-photos";
pub const PUBLIC_BASE: &str = "http://127.0.0.1:3000/blobs/street-lawyer-services";

pub struct Pipeline {
    pub pool: Arc<SqlitePool>,
    pub blobs: Arc<DiskBlobStore>,
    pub ledger: StatusLedger,
    pub queue: Arc<SqliteJobQueue>,
    pub layout: BlobLayout,
    pub dir: TempDir,
}

impl Pipeline {
    pub async fn new() -> Self {
        Self::with_visibility(Duration::from_secs(60)).await
    }

    pub async fn with_visibility(visibility: Duration) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = Arc::new(db::memory_pool().await);
        let blobs = Arc::new(DiskBlobStore::new(pool.clone(), dir.path()));
        let ledger = StatusLedger::new(
            Arc::new(SqliteLedgerTable::new(pool.clone())),
            Self::retry(),
        );
        let queue = Arc::new(SqliteJobQueue::new(pool.clone(), visibility, 5));
        Self {
            pool,
            blobs,
            ledger,
            queue,
            layout: BlobLayout::new(BUCKET, ROOT, PUBLIC_BASE),
            dir,
        }
    }

    pub fn retry() -> RetryPolicy {
        RetryPolicy::exponential(3, Duration::from_millis(1))
    }

    pub fn ingress(&self) -> IngressService {
        IngressService::new(
            self.blobs.clone(),
            self.ledger.clone(),
            self.queue.clone(),
            self.layout.clone(),
            ImageBounds::default(),
            RetryPolicy::linear(3, Duration::from_millis(1)),
        )
    }

    pub fn processor(&self, media: impl MediaApi + 'static, tokens: impl TokenSource + 'static) -> Processor {
        Processor::new(self.context(media, tokens))
    }

    pub fn context(
        &self,
        media: impl MediaApi + 'static,
        tokens: impl TokenSource + 'static,
    ) -> ProcessorContext {
        ProcessorContext {
            blobs: self.blobs.clone(),
            ledger: self.ledger.clone(),
            queue: self.queue.clone(),
            media: Arc::new(media),
            tokens: Arc::new(tokens),
            locations: LocationDirectory::parse("dc=111,towson=222").unwrap(),
            layout: self.layout.clone(),
            category: MediaCategory::Product,
            retry: Self::retry(),
        }
    }

    /// Handler state over this pipeline, with blobs probed under the temp dir.
    pub fn app_state(&self, media: impl MediaApi + 'static, tokens: impl TokenSource + 'static) -> AppState {
        AppState {
            db: self.pool.clone(),
            storage_dir: self.dir.path().to_path_buf(),
            blobs: self.blobs.clone(),
            ledger: self.ledger.clone(),
            queue: self.queue.clone(),
            ingress: self.ingress(),
            batch: BatchDriver::new(Arc::new(self.processor(media, tokens))),
        }
    }

    /// Ingest a 20 KiB jpeg for `store_id` and return its upload key.
    pub async fn ingest(&self, store_id: &str, file_name: &str) -> String {
        self.ingress()
            .ingest(photo_request(store_id, file_name))
            .await
            .unwrap()
    }
}

pub fn photo_request(store_id: &str, file_name: &str) -> IngestRequest {
    IngestRequest {
        file_name: Some(file_name.to_string()),
        file_content: Some(general_purpose::STANDARD.encode(vec![0xD8u8; 20 * 1024])),
        content_type: Some("image/jpeg".to_string()),
        store_id: Some(store_id.to_string()),
    }
}

pub fn granting_tokens() -> MockTokenSource {
    let mut tokens = MockTokenSource::new();
    tokens
        .expect_access_token()
        .returning(|| Ok(AccessToken("test-token".into())));
    tokens
}

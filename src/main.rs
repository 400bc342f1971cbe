use anyhow::Result;
use axum::{Router, extract::DefaultBodyLimit};
use std::{env, fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use services::{
    batch::BatchDriver,
    blob_store::DiskBlobStore,
    ingress::IngressService,
    ledger::{SqliteLedgerTable, StatusLedger},
    media_api::{BusinessProfileClient, ServiceAccountTokenSource},
    processor::{Processor, ProcessorContext},
    queue::{JobQueue, SqliteJobQueue},
};

mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    init_tracing();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting photo-ingest with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection + schema ---
    let db = Arc::new(db::connect(&cfg.database_url).await?);
    db::run_migrations(&db).await?;

    // --- Handle migration mode ---
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    let account_id = cfg.require_account_id()?;
    let stores: Vec<&str> = cfg.locations.stores().collect();
    if stores.is_empty() {
        tracing::warn!("No store locations configured; every upload job will fail validation");
    } else {
        tracing::info!(?stores, "Configured store locations");
    }

    // --- Initialize collaborators ---
    let blobs = Arc::new(DiskBlobStore::new(db.clone(), &cfg.storage_dir));
    let ledger_table = Arc::new(SqliteLedgerTable::new(db.clone()));
    let queue: Arc<dyn JobQueue> = Arc::new(SqliteJobQueue::new(
        db.clone(),
        cfg.visibility_timeout,
        cfg.max_receive_count,
    ));
    let layout = cfg.layout();

    let ingress = IngressService::new(
        blobs.clone(),
        StatusLedger::new(ledger_table.clone(), cfg.ingress_retry()),
        queue.clone(),
        layout.clone(),
        cfg.image_bounds,
        cfg.ingress_retry(),
    );

    let egress_ledger = StatusLedger::new(ledger_table, cfg.egress_retry());
    let processor = Processor::new(ProcessorContext {
        blobs: blobs.clone(),
        ledger: egress_ledger.clone(),
        queue: queue.clone(),
        media: Arc::new(BusinessProfileClient::new(
            &cfg.media_api_base,
            account_id,
            cfg.upload_timeout,
        )?),
        tokens: Arc::new(ServiceAccountTokenSource::new(
            &cfg.credentials_file,
            cfg.upload_timeout,
        )?),
        locations: cfg.locations.clone(),
        layout,
        category: cfg.media_category,
        retry: cfg.egress_retry(),
    });
    let batch = BatchDriver::new(Arc::new(processor));

    let state = state::AppState {
        db,
        storage_dir: cfg.storage_dir.clone().into(),
        blobs,
        ledger: egress_ledger,
        queue: queue.clone(),
        ingress,
        batch: batch.clone(),
    };

    // --- Start queue worker ---
    let shutdown = CancellationToken::new();
    let worker = {
        let shutdown = shutdown.clone();
        let settings = cfg.worker_settings();
        tokio::spawn(async move { batch.run_worker(queue, settings, shutdown).await })
    };

    // --- Build router ---
    let app: Router = routes::routes::routes()
        .layer(DefaultBodyLimit::max(cfg.max_request_bytes()))
        .with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    worker.await?;
    tracing::info!("Shutdown complete");

    Ok(())
}

/// Human-readable logs by default; one JSON object per line when
/// `PHOTO_INGEST_LOG_JSON=1`.
fn init_tracing() {
    let json = matches!(
        env::var("PHOTO_INGEST_LOG_JSON").as_deref(),
        Ok("1") | Ok("true")
    );
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    if json {
        builder.json().with_current_span(true).init();
    } else {
        builder.init();
    }
}

/// Resolves on Ctrl-C or when `token` is cancelled elsewhere, and cancels it.
async fn shutdown_signal(token: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Shutdown signal received"),
            Err(err) => {
                tracing::error!("Failed to listen for Ctrl-C: {}", err);
                token.cancelled().await;
            }
        },
        _ = token.cancelled() => {}
    }
    token.cancel();
}

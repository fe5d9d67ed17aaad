//! RxHub pipeline worker - main entry point

use std::sync::Arc;

use anyhow::Result;
use rxhub_common::logging::{init_logging, LogConfig};
use tokio::signal;
use tokio::sync::watch;
use tracing::info;

use rxhub_pipeline::chunker::Chunker;
use rxhub_pipeline::config::PipelineConfig;
use rxhub_pipeline::db;
use rxhub_pipeline::events::{EventLog, MemoryEventLog};
use rxhub_pipeline::orchestrator::{
    ChunkWorkerFactory, EventLogLagProbe, WorkerPool,
};
use rxhub_pipeline::storage::{config::StorageConfig, ObjectStore};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging with configuration from environment
    let log_config = LogConfig::builder()
        .log_file_prefix("rxhub-pipeline".to_string())
        .filter_directives("rxhub_pipeline=debug,sqlx=info,aws_sdk_s3=warn".to_string())
        .build();

    // Environment variables take precedence
    let log_config = LogConfig::from_env().unwrap_or(log_config);

    init_logging(&log_config)?;

    info!("Starting RxHub pipeline");

    let config = PipelineConfig::load()?;
    info!(
        chunk_size = config.chunking.chunk_size,
        min_workers = config.workers.min_workers,
        max_workers = config.workers.max_workers,
        "Configuration loaded"
    );

    let db_config = db::DbConfig::from_env()?;
    let pool = db::create_pool(&db_config).await?;

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;
    info!("Database migrations completed");

    let storage_config = StorageConfig::from_env()?;
    let store = ObjectStore::new(storage_config).await?;
    info!("Object store client initialized");

    // In-process event log; a broker-backed implementation swaps in here.
    let event_log = Arc::new(MemoryEventLog::new());
    let log: Arc<dyn EventLog> = event_log.clone();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Chunker: single consumer turning batches into chunk fan-out.
    let chunker = Chunker::new(
        pool.clone(),
        store.clone(),
        Arc::clone(&log),
        config.chunking.chunk_size,
        config.chunking.consumer_group.clone(),
    );
    let chunker_handle = tokio::spawn(chunker.run(shutdown_rx.clone()));

    // Chunk worker pool, supervised between floor and ceiling.
    let factory = ChunkWorkerFactory::new(
        pool.clone(),
        store.clone(),
        Arc::clone(&log),
        config.workers.consumer_group.clone(),
    );
    let probe = EventLogLagProbe::new(Arc::clone(&log), config.workers.consumer_group.clone());
    let worker_pool = WorkerPool::new(Arc::new(factory), Arc::new(probe), config.workers.clone());
    let pool_handle = tokio::spawn(worker_pool.run(shutdown_rx));

    info!("Pipeline running, waiting for shutdown signal");
    shutdown_signal().await;

    info!("Shutting down pipeline");
    let _ = shutdown_tx.send(true);
    event_log.close();

    let _ = chunker_handle.await;
    let _ = pool_handle.await;

    info!("Pipeline shut down gracefully");

    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

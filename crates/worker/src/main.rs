use std::sync::Arc;

use genbatch_core::crypto::MasterKey;
use genbatch_genapi::{GenerationClient, GenerationClientConfig};
use genbatch_queue::{PgJobQueue, QueueConfig};
use genbatch_storage::config::StorageConfig;
use genbatch_worker::credentials::PgCredentialResolver;
use genbatch_worker::store::PgExecutionStore;
use genbatch_worker::{BatchProcessor, ProcessorSettings, WorkerConfig, WorkerPool};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "genbatch_worker=debug,genbatch_genapi=debug,genbatch_queue=info,genbatch_storage=info"
            .into()
    });
    if config.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(pool_size = config.pool_size, "Worker starting");

    let pool = genbatch_db::create_pool(&config.database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    genbatch_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    genbatch_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    let master_key = MasterKey::from_base64(&config.credential_encryption_key)
        .expect("CREDENTIAL_ENCRYPTION_KEY must be a base64-encoded 32-byte key");

    let storage = StorageConfig::from_env()
        .expect("Invalid storage configuration")
        .connect()
        .await
        .expect("Failed to initialise artifact storage");

    let queue_config = QueueConfig::from_env();
    tracing::info!(
        max_attempts = queue_config.max_attempts,
        visibility_timeout_secs = queue_config.visibility_timeout.as_secs(),
        "Job queue configured",
    );
    let queue = Arc::new(PgJobQueue::new(pool.clone(), queue_config));

    let generator = Arc::new(GenerationClient::new(GenerationClientConfig::from_env()));

    let processor = Arc::new(BatchProcessor::new(
        Arc::new(PgExecutionStore::new(pool.clone())),
        generator,
        storage,
        Arc::new(PgCredentialResolver::new(pool.clone(), master_key)),
        ProcessorSettings::from(&config),
    ));

    let workers = Arc::new(WorkerPool::new(
        queue,
        processor,
        config.pool_size,
        config.reaper_interval,
    ));

    let shutdown = CancellationToken::new();
    let pool_handle = tokio::spawn(workers.run(shutdown.clone()));

    shutdown_signal().await;
    tracing::info!("Waiting for in-flight jobs to finish");
    shutdown.cancel();

    if let Err(e) = pool_handle.await {
        tracing::error!(error = %e, "Worker pool task failed");
    }

    pool.close().await;
    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}

use std::sync::Arc;

use clap::Parser;
use metrics_server::api::{ApiServer, AppState};
use metrics_server::config::ServerConfig;
use metrics_server::logging;
use metrics_server::storage::{MemoryStore, MetricStore, ResilientStore, SqliteConnector};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables before flags fall back to them
    dotenvy::dotenv().ok();
    let config = ServerConfig::parse();

    let _log_guard = logging::init_logging(config.log_dir.as_deref())?;
    info!("Starting metrics-server: {}", config);

    let cancel_token = CancellationToken::new();

    let (store, dump_task) = match config.database_dsn() {
        Some(dsn) => {
            info!("Using SQLite storage");
            let store: Arc<dyn MetricStore> = Arc::new(
                ResilientStore::new(SqliteConnector::new(dsn))
                    .with_probe_cooldown(config.probe_cooldown()),
            );
            (store, None)
        }
        None => {
            let memory = Arc::new(MemoryStore::open(config.memory_store()).await);
            let task = memory.spawn_periodic_dump(cancel_token.child_token());
            let store: Arc<dyn MetricStore> = memory;
            (store, task)
        }
    };

    let state = AppState::new(Arc::clone(&store)).with_sign_key(config.key.clone());
    let server = ApiServer::new(config.api_server(), state, cancel_token.clone());

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        cancel_token.cancel();
    });

    let served = server.run().await;

    if let Some(task) = dump_task
        && let Err(e) = task.await
    {
        warn!(error = %e, "Snapshot task failed");
    }
    if let Err(e) = store.close().await {
        warn!(error = %e, "Failed to close storage");
    }

    served?;
    info!("metrics-server stopped");
    Ok(())
}

/// Wait for Ctrl+C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

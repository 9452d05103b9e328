pub mod archive;
pub mod handlers;
pub mod routes;

use crate::common::Config;
use crate::transfer::TransferManager;
use anyhow::{Context, Result};
use handlers::AppState;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Prepare directories, bind `host:port` and serve until Ctrl-C / SIGTERM.
pub async fn start_server(config: Config) -> Result<()> {
    let addr = SocketAddr::new(config.host, config.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    serve(listener, config, shutdown).await
}

/// Serve on an already bound listener until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, config: Config, shutdown: CancellationToken) -> Result<()> {
    tokio::fs::create_dir_all(&config.storage_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.storage_dir.display()))?;
    tokio::fs::create_dir_all(&config.temp_dir)
        .await
        .with_context(|| format!("Failed to create {}", config.temp_dir.display()))?;

    let manager = TransferManager::from_config(&config);
    if let Err(e) = manager.purge_stale_scratch().await {
        tracing::warn!(error = %e, "Could not purge stale chunk directories");
    }

    let sweeper = config.transfer.idle_timeout().map(|max_idle| {
        manager.spawn_sweeper(config.transfer.sweep_interval(), max_idle, shutdown.clone())
    });

    let state = AppState::new(manager);
    let app = routes::create_router(&state, config.transfer.max_request_bytes);

    let local_addr = listener.local_addr()?;
    tracing::info!(
        addr = %local_addr,
        storage = %config.storage_dir.display(),
        temp = %config.temp_dir.display(),
        "Upload server listening"
    );

    let stop = shutdown.clone();
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { stop.cancelled().await })
        .await;

    // stop the sweeper even if serving failed
    shutdown.cancel();
    if let Some(handle) = sweeper {
        let _ = handle.await;
    }

    served.context("Server error")?;
    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!(error = %e, "Ctrl+C handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down"),
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}

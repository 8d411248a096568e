use std::sync::Arc;

use clipshelf::{
    api::{self, AppState},
    config::Settings,
    error::ApiError,
    index::JsonIndex,
    lifecycle::LifecycleManager,
    store::DiskStore,
    sweeper::Sweeper,
    ytdlp::YtDlp,
};
use tokio::{net::TcpListener, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "clipshelf=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let settings = Settings::from_env();

    tokio::fs::create_dir_all(&settings.data_dir)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not create data directory {:?}: {error}",
                settings.data_dir
            ))
        })?;

    let store = DiskStore::new(&settings.downloads_dir);
    store
        .ensure_root()
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;
    let index = JsonIndex::open(settings.index_path())
        .await
        .map_err(|error| ApiError::internal(error.to_string()))?;
    let lifecycle =
        Arc::new(LifecycleManager::new(index, store).with_index_grace(settings.index_grace));

    info!(
        "Storing artifacts in {:?}, index at {:?}, sweeping every {:?} (orphan reconciliation: {})",
        settings.downloads_dir,
        settings.index_path(),
        settings.sweep_interval,
        settings.reconcile_orphans
    );

    let shutdown = CancellationToken::new();
    let sweeper = Sweeper::new(Arc::clone(&lifecycle), settings.sweep_interval)
        .reconcile_orphans(settings.reconcile_orphans)
        .spawn(shutdown.clone());

    let extractor = YtDlp::new(&settings.yt_dlp_bin, settings.yt_dlp_timeout);
    let state = AppState::new(lifecycle, extractor, settings.max_concurrent_downloads);
    let cors = api::build_cors_layer(&settings.allowed_origins)?;
    let app = api::app(state, &settings.static_dir, cors);

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .map_err(|error| {
            ApiError::internal(format!(
                "Could not bind {}: {error}",
                settings.bind_addr
            ))
        })?;

    info!("Backend ready at http://{}", settings.bind_addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")));

    shutdown.cancel();
    if let Err(error) = sweeper.await {
        warn!("Sweeper task ended abnormally: {error}");
    }

    served
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {error}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!("Could not listen for SIGTERM: {error}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = shutdown.cancelled() => {}
    }

    info!("Shutting down");
}

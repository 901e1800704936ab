//! Ouvidoria Server - REST API for citizen manifestation intake
//!
//! Reads configuration from the environment, connects to PostgreSQL when
//! `DATABASE_URL` is set (in-memory storage otherwise), starts the extraction
//! workers and serves the API until Ctrl+C or SIGTERM.

use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use ouvidoria_core::ExtractionPipeline;
use ouvidoria_server::{
    create_router, AppState, Config, InMemoryManifestationStore, ManifestationStore,
    PostgresManifestationStore,
};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ouvidoria_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env();
    let addr = config.socket_addr();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        uploads_dir = %config.uploads_dir.display(),
        max_file_size_mb = config.max_file_size_mb(),
        "Starting Ouvidoria server"
    );

    let store: Arc<dyn ManifestationStore> = match &config.database_url {
        Some(url) => {
            let store = PostgresManifestationStore::connect(
                url,
                config.database_max_connections,
                config.database_min_connections,
            )
            .await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => Arc::new(InMemoryManifestationStore::new()),
    };

    let pipeline = ExtractionPipeline::from_settings(config.extraction.clone());
    let (state, workers) = AppState::build(config, store, pipeline).await?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);
    tracing::info!("API docs at http://{}/docs", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Waiting for pending extractions");
    workers.join().await;
    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
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

    tracing::info!("Shutdown signal received");
}

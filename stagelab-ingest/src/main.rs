//! stagelab-ingest - Batch image ingestion service
//!
//! Accepts lab-subject image batches, uploads them to object storage,
//! triggers remote stage classification, reconciles results and commits
//! accepted results as stage log records.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stagelab_common::config::load_toml_config;
use stagelab_common::events::EventBus;
use stagelab_ingest::config::{Args, IngestConfig};
use stagelab_ingest::AppState;

const EVENT_BUS_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = IngestConfig::config_path(&args)?;
    let toml_config = load_toml_config(&config_path)?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("stagelab_ingest={0},stagelab_common={0},tower_http=info", toml_config.logging.level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        profile = env!("BUILD_PROFILE"),
        "Starting stagelab-ingest"
    );
    info!(config = %config_path.display(), "Configuration file");

    let config = IngestConfig::resolve(&args, &toml_config).context("Invalid configuration")?;
    info!(
        chunk_size = config.chunk_size,
        poll_interval_secs = config.poll_interval.as_secs(),
        legacy_filename_fallback = config.legacy_filename_fallback,
        "Pipeline settings resolved"
    );

    let collaborators = stagelab_ingest::build_collaborators(&config)
        .await
        .context("Failed to initialize collaborator services")?;

    let event_bus = EventBus::new(EVENT_BUS_CAPACITY);
    let state = AppState::new(collaborators, config.pipeline_settings(), event_bus);
    let app = stagelab_ingest::build_router(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
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
            Ok(mut stream) => {
                stream.recv().await;
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}

//! stagelab-ingest library interface
//!
//! Resumable batch image ingestion: archives and loose files in, chunked
//! uploads, one analysis trigger per session, polling reconciliation, and a
//! commit into stage log records.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod types;
pub mod utils;
pub mod workflow;

pub use crate::error::{ApiError, ApiResult, PipelineError};

use axum::Router;
use chrono::{DateTime, Utc};
use stagelab_common::events::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::config::{IngestConfig, PersistenceBackend};
use crate::services::{AssistClient, JobClient, RestPersistence, ServiceClient, StorageClient};
use crate::types::{FilenameAssist, PersistenceService};
use crate::workflow::{Collaborators, IngestPipeline, PipelineSettings};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub collaborators: Collaborators,
    pub settings: PipelineSettings,
    /// Live pipelines by session id
    pub pipelines: Arc<RwLock<HashMap<Uuid, Arc<IngestPipeline>>>>,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last surfaced error, reported by `/health`
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(collaborators: Collaborators, settings: PipelineSettings, event_bus: EventBus) -> Self {
        Self {
            event_bus,
            collaborators,
            settings,
            pipelines: Arc::new(RwLock::new(HashMap::new())),
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }
}

/// Build the collaborator set described by `config`
pub async fn build_collaborators(config: &IngestConfig) -> stagelab_common::Result<Collaborators> {
    let client = |service: &'static str, url: &str| {
        ServiceClient::new(service, url, config.api_key.clone(), config.request_timeout)
    };

    let persistence: Arc<dyn PersistenceService> = match &config.persistence {
        PersistenceBackend::Remote(url) => {
            tracing::info!(url = %url, "Using remote persistence service");
            Arc::new(RestPersistence::new(client("persistence", url.as_str())?))
        }
        PersistenceBackend::Sqlite(path) => {
            tracing::info!(database = %path.display(), "Using local SQLite persistence");
            let pool = db::init_database_pool(path).await?;
            Arc::new(db::SqlitePersistence::new(pool))
        }
    };

    let assist: Option<Arc<dyn FilenameAssist>> = match &config.assist_url {
        Some(url) => Some(Arc::new(AssistClient::new(client("assist", url.as_str())?))),
        None => {
            tracing::info!("No filename assist configured; low-confidence names stay unresolved");
            None
        }
    };

    Ok(Collaborators {
        storage: Arc::new(StorageClient::new(
            client("storage", config.storage_url.as_str())?,
            config.destination_ttl,
        )),
        jobs: Arc::new(JobClient::new(client("jobs", config.jobs_url.as_str())?)),
        persistence,
        assist,
    })
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::session_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

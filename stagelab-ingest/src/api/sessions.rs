//! Session workflow API handlers
//!
//! | Route | Stage |
//! |-------|-------|
//! | `POST /sessions` | resume or create |
//! | `POST /sessions/:id/files` | ingestion (+ background subject resolution) |
//! | `POST /sessions/:id/upload` | upload coordinator, in the background (202) |
//! | `POST /sessions/:id/analyze` | analysis dispatcher (+ poller) |
//! | `GET /sessions/:id/items` | summary and items |
//! | `PATCH /sessions/:id/items/:local_id` | subject edit |
//! | `POST /sessions/:id/commit` | commit |
//! | `DELETE /sessions/:id` | discard |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult, PipelineError};
use crate::models::Item;
use crate::workflow::{CommitReport, IngestInput, IngestPipeline, IngestReport, SessionSummary};
use crate::AppState;

/// POST /sessions request
#[derive(Debug, Deserialize)]
pub struct OpenSessionRequest {
    pub collection_id: Uuid,
    pub owner_id: Uuid,
}

/// POST /sessions/:id/files request
#[derive(Debug, Deserialize)]
pub struct AddFilesRequest {
    /// Image files or `.zip` archives on the service host
    pub paths: Vec<PathBuf>,
}

/// PATCH /sessions/:id/items/:local_id request
#[derive(Debug, Deserialize)]
pub struct UpdateSubjectRequest {
    #[serde(default)]
    pub assigned_subject_id: Option<Uuid>,
    #[serde(default)]
    pub new_subject_name: Option<String>,
}

/// POST /sessions/:id/upload response
#[derive(Debug, Serialize)]
pub struct UploadAccepted {
    pub session_id: Uuid,
    pub pending: usize,
}

/// POST /sessions/:id/analyze response
#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub session_id: Uuid,
    pub dispatched: usize,
}

/// GET /sessions/:id/items response
#[derive(Debug, Serialize)]
pub struct ItemsResponse {
    pub summary: SessionSummary,
    pub items: Vec<Item>,
}

async fn pipeline_for(state: &AppState, session_id: Uuid) -> ApiResult<Arc<IngestPipeline>> {
    state
        .pipelines
        .read()
        .await
        .get(&session_id)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("Session {}", session_id)))
}

/// Remember a surfaced pipeline error for `/health`
async fn surfaced<T>(state: &AppState, result: Result<T, PipelineError>) -> ApiResult<T> {
    if let Err(e) = &result {
        if e.is_alert() {
            *state.last_error.write().await = Some(e.to_string());
        }
    }
    result.map_err(ApiError::from)
}

/// POST /sessions
///
/// 201 for a new session, 200 when a pending one was resumed.
pub async fn open_session(
    State(state): State<AppState>,
    Json(request): Json<OpenSessionRequest>,
) -> ApiResult<(StatusCode, Json<SessionSummary>)> {
    let pipeline = surfaced(
        &state,
        IngestPipeline::open(
            request.collection_id,
            request.owner_id,
            state.collaborators.clone(),
            state.settings.clone(),
            state.event_bus.clone(),
        )
        .await,
    )
    .await?;

    let session_id = pipeline.session_id().await;
    let mut pipelines = state.pipelines.write().await;

    // Already driving this session; keep the live pipeline and its poller
    if let Some(existing) = pipelines.get(&session_id) {
        return Ok((StatusCode::OK, Json(existing.summary().await)));
    }

    let status = if pipeline.is_resumed() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    let pipeline = Arc::new(pipeline);
    let summary = pipeline.summary().await;
    pipelines.insert(session_id, pipeline);
    Ok((status, Json(summary)))
}

/// POST /sessions/:id/files
pub async fn add_files(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
    Json(request): Json<AddFilesRequest>,
) -> ApiResult<(StatusCode, Json<IngestReport>)> {
    if request.paths.is_empty() {
        return Err(ApiError::BadRequest("No paths given".to_string()));
    }
    let pipeline = pipeline_for(&state, session_id).await?;
    let inputs = request.paths.into_iter().map(IngestInput::Path).collect();
    let report = surfaced(&state, pipeline.ingest(inputs).await).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// POST /sessions/:id/upload
///
/// Runs the upload in the background; progress arrives as
/// `ItemStatusChanged` events.
pub async fn start_upload(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<UploadAccepted>)> {
    let pipeline = pipeline_for(&state, session_id).await?;
    let pending = pipeline.summary().await.counts.pending;

    tokio::spawn(async move {
        let report = pipeline.upload_pending().await;
        tracing::debug!(
            session_id = %session_id,
            uploaded = report.uploaded,
            failed = report.failed,
            "Background upload finished"
        );
    });

    Ok((StatusCode::ACCEPTED, Json(UploadAccepted { session_id, pending })))
}

/// POST /sessions/:id/analyze
pub async fn start_analysis(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<AnalyzeResponse>> {
    let pipeline = pipeline_for(&state, session_id).await?;
    let dispatched = surfaced(&state, pipeline.start_analysis().await).await?;
    Ok(Json(AnalyzeResponse {
        session_id,
        dispatched,
    }))
}

/// GET /sessions/:id/items
pub async fn list_items(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<ItemsResponse>> {
    let pipeline = pipeline_for(&state, session_id).await?;
    Ok(Json(ItemsResponse {
        summary: pipeline.summary().await,
        items: pipeline.items().await,
    }))
}

/// PATCH /sessions/:id/items/:local_id
pub async fn update_subject(
    State(state): State<AppState>,
    Path((session_id, local_id)): Path<(Uuid, Uuid)>,
    Json(request): Json<UpdateSubjectRequest>,
) -> ApiResult<Json<Item>> {
    if request.assigned_subject_id.is_none() && request.new_subject_name.is_none() {
        return Err(ApiError::BadRequest(
            "Provide assigned_subject_id or new_subject_name".to_string(),
        ));
    }
    let pipeline = pipeline_for(&state, session_id).await?;
    let item = pipeline
        .set_subject(local_id, request.assigned_subject_id, request.new_subject_name)
        .await?;
    Ok(Json(item))
}

/// POST /sessions/:id/commit
pub async fn commit(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<Json<CommitReport>> {
    let pipeline = pipeline_for(&state, session_id).await?;
    let report = surfaced(&state, pipeline.commit().await).await?;

    if report.session_completed {
        state.pipelines.write().await.remove(&session_id);
    }
    Ok(Json(report))
}

/// DELETE /sessions/:id
pub async fn discard(
    State(state): State<AppState>,
    Path(session_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    let pipeline = state
        .pipelines
        .write()
        .await
        .remove(&session_id)
        .ok_or_else(|| ApiError::NotFound(format!("Session {}", session_id)))?;
    pipeline.discard().await;
    Ok(StatusCode::NO_CONTENT)
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(open_session))
        .route("/sessions/:id", delete(discard))
        .route("/sessions/:id/files", post(add_files))
        .route("/sessions/:id/upload", post(start_upload))
        .route("/sessions/:id/analyze", post(start_analysis))
        .route("/sessions/:id/items", get(list_items))
        .route("/sessions/:id/items/:local_id", patch(update_subject))
        .route("/sessions/:id/commit", post(commit))
}

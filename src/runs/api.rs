use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;

use super::models::RunStatus;
use super::store::{ResetOutcome, RunStore};
use super::worker::{EnqueueRejection, WorkerPool};

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub store: Arc<dyn RunStore>,
    pub pool: Arc<WorkerPool>,
}

pub type SharedState = Arc<AppState>;

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize)]
pub struct CreateRunRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub github_url: String,
}

#[derive(Deserialize)]
pub struct ListRunsQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = %format!("{:#}", err), "Request failed");
        ApiError::Internal(err.to_string())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/runs", get(list_runs).post(create_run))
        .route("/api/runs/{id}", get(get_run))
        .route("/api/runs/{id}/enqueue", post(enqueue_run))
        .route("/api/runs/{id}/reset", post(reset_run))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_runs(
    State(state): State<SharedState>,
    Query(query): Query<ListRunsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(RunStatus::from_str)
        .transpose()
        .map_err(ApiError::BadRequest)?;
    let limit = query.limit.unwrap_or(50).min(500);
    let runs = state.store.list(status, limit).await?;
    Ok(Json(runs))
}

async fn create_run(
    State(state): State<SharedState>,
    Json(req): Json<CreateRunRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim();
    let github_url = req.github_url.trim();
    if email.is_empty() || github_url.is_empty() {
        return Err(ApiError::BadRequest("email and github_url required".into()));
    }
    let run = state.store.create(email, github_url).await?;
    tracing::info!(run_id = run.id, github_url, "Run created");
    Ok((
        StatusCode::CREATED,
        Json(serde_json::json!({"id": run.id, "status": run.status})),
    ))
}

async fn get_run(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match state.store.get(id).await? {
        Some(run) => Ok(Json(run)),
        None => Err(ApiError::NotFound(format!("Run {} not found", id))),
    }
}

async fn enqueue_run(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.pool.enqueue(id).await?;
    if outcome.reason == Some(EnqueueRejection::NotFound) {
        return Err(ApiError::NotFound(format!("Run {} not found", id)));
    }
    Ok(Json(serde_json::json!({
        "id": id,
        "accepted": outcome.accepted,
        "status": outcome.status,
        "reason": outcome.reason,
    })))
}

async fn reset_run(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match state.pool.reset(id).await? {
        ResetOutcome::Reset(run) => Ok(Json(*run)),
        ResetOutcome::NotFound => Err(ApiError::NotFound(format!("Run {} not found", id))),
        ResetOutcome::Refused(status) => Err(ApiError::Conflict(format!(
            "Run {} cannot be reset while {} or in flight",
            id, status
        ))),
    }
}

//! REST API handlers.
//!
//! Each handler reads/writes via the store or dispatches through the
//! reconciler and returns JSON responses in a uniform envelope.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;

use krane_core::{config::DeploymentConfig, job, secrets, Error};
use krane_store::StoreError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> axum::response::Response {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
        .into_response()
}

/// HTTP status for an engine error.
fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::DeploymentMissing(_) | Error::Store(StoreError::Missing(_)) => {
            StatusCode::NOT_FOUND
        }
        Error::QueueFull => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn engine_error(err: Error) -> axum::response::Response {
    error_response(&err.to_string(), status_for(&err))
}

/// GET /
pub async fn server_status() -> impl IntoResponse {
    ApiResponse::ok(serde_json::json!({
        "service": "krane",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Deployments ────────────────────────────────────────────────

/// GET /deployments
pub async fn list_deployments(State(state): State<ApiState>) -> impl IntoResponse {
    match DeploymentConfig::list(state.store.as_ref()) {
        Ok(configs) => ApiResponse::ok(configs).into_response(),
        Err(e) => engine_error(e),
    }
}

/// POST /deployments
pub async fn save_deployment(
    State(state): State<ApiState>,
    Json(mut config): Json<DeploymentConfig>,
) -> impl IntoResponse {
    match config.save(state.store.as_ref()) {
        Ok(()) => (StatusCode::CREATED, ApiResponse::ok(config)).into_response(),
        Err(e) => engine_error(e),
    }
}

/// GET /deployments/{name}
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match DeploymentConfig::load(state.store.as_ref(), &name) {
        Ok(config) => ApiResponse::ok(config).into_response(),
        Err(e) => engine_error(e),
    }
}

/// One enqueued job, answered to the caller as the correlation handle.
fn job_accepted(deployment: &str, job_id: String) -> axum::response::Response {
    (
        StatusCode::ACCEPTED,
        ApiResponse::ok(serde_json::json!({
            "deployment": deployment,
            "job": job_id,
        })),
    )
        .into_response()
}

/// DELETE /deployments/{name}
pub async fn delete_deployment(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.reconciler.delete(&name) {
        Ok(job_id) => job_accepted(&name, job_id),
        Err(e) => engine_error(e),
    }
}

/// POST /deployments/{name}/run
pub async fn run_deployment(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.reconciler.run(&name) {
        Ok(job_id) => job_accepted(&name, job_id),
        Err(e) => engine_error(e),
    }
}

/// POST /deployments/{name}/start
pub async fn start_deployment(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.reconciler.start(&name) {
        Ok(job_id) => job_accepted(&name, job_id),
        Err(e) => engine_error(e),
    }
}

/// POST /deployments/{name}/stop
pub async fn stop_deployment(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.reconciler.stop(&name) {
        Ok(job_id) => job_accepted(&name, job_id),
        Err(e) => engine_error(e),
    }
}

/// POST /deployments/{name}/restart
pub async fn restart_deployment(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.reconciler.restart(&name) {
        Ok(job_id) => job_accepted(&name, job_id),
        Err(e) => engine_error(e),
    }
}

// ── Containers ─────────────────────────────────────────────────

/// GET /deployments/{name}/containers
pub async fn list_containers(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match state.reconciler.containers(&name).await {
        Ok(containers) => ApiResponse::ok(containers).into_response(),
        Err(e) => engine_error(e),
    }
}

// ── Secrets ────────────────────────────────────────────────────

/// Secret creation body.
#[derive(Deserialize)]
pub struct SecretRequest {
    pub key: String,
    pub value: String,
}

/// GET /secrets/{name} — keys only, values never leave the store.
pub async fn list_secrets(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match secrets::list(state.store.as_ref(), &name) {
        Ok(secrets) => {
            let keys: Vec<String> = secrets.into_iter().map(|s| s.key).collect();
            ApiResponse::ok(keys).into_response()
        }
        Err(e) => engine_error(e),
    }
}

/// POST /secrets/{name}
pub async fn create_secret(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Json(req): Json<SecretRequest>,
) -> impl IntoResponse {
    match secrets::put(state.store.as_ref(), &name, &req.key, &req.value) {
        Ok(secret) => (StatusCode::CREATED, ApiResponse::ok(secret.key)).into_response(),
        Err(e) => engine_error(e),
    }
}

// ── Jobs ───────────────────────────────────────────────────────

/// Query parameters for the recent-jobs listing.
#[derive(Deserialize)]
pub struct JobsQuery {
    #[serde(default = "default_jobs_limit")]
    pub limit: usize,
}

fn default_jobs_limit() -> usize {
    50
}

/// GET /jobs?limit=N
pub async fn recent_jobs(
    State(state): State<ApiState>,
    Query(query): Query<JobsQuery>,
) -> impl IntoResponse {
    match job::recent(state.store.as_ref(), query.limit) {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => engine_error(e),
    }
}

/// GET /jobs/{name}
pub async fn jobs_by_deployment(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match job::by_deployment(state.store.as_ref(), &name) {
        Ok(jobs) => ApiResponse::ok(jobs).into_response(),
        Err(e) => engine_error(e),
    }
}

/// GET /jobs/{name}/{id}
pub async fn job_by_id(
    State(state): State<ApiState>,
    Path((name, id)): Path<(String, String)>,
) -> impl IntoResponse {
    match job::by_id(state.store.as_ref(), &name, &id) {
        Ok(job) => ApiResponse::ok(job).into_response(),
        Err(e) => engine_error(e),
    }
}

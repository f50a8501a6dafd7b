/// REST API routes.
///
/// Every error is returned as `{"error": "..."}` with a status code
/// derived from the [`LedgerError`] variant.
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::AppState;
use crate::anchor::{LedgerEntry, LedgerQuery, RegistryReader, RegistrySigner};
use crate::error::LedgerError;
use crate::pipeline::{self, AnchorResult, CaptureResult, SnapshotListing, Verification};
use crate::project::ProjectManifest;
use crate::snapshot::Step;

/// Error body shared by all routes.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<T, ApiError>;

fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::Validation(_) | LedgerError::InvalidDigest(_) => StatusCode::BAD_REQUEST,
        LedgerError::NotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::SnapshotExists(_)
        | LedgerError::SnapshotModified(_)
        | LedgerError::AlreadyAnchored { .. } => StatusCode::CONFLICT,
        LedgerError::NotReady(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LedgerError::Rpc(_)
        | LedgerError::ChainMismatch { .. }
        | LedgerError::Reverted(_)
        | LedgerError::MissingEvent(_) => StatusCode::BAD_GATEWAY,
        LedgerError::ReceiptTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        LedgerError::Io(_)
        | LedgerError::Serialization(_)
        | LedgerError::Config(_)
        | LedgerError::Signing(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn api_error(err: LedgerError) -> ApiError {
    let status = status_for(&err);
    if status.is_server_error() {
        tracing::warn!(error = %err, status = status.as_u16(), "Request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

fn unavailable(what: &str) -> ApiError {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse {
            error: format!("{what} is not configured"),
        }),
    )
}

fn reader(state: &AppState) -> ApiResult<&dyn RegistryReader> {
    state
        .reader
        .as_deref()
        .ok_or_else(|| unavailable("Chain access"))
}

fn signer(state: &AppState) -> ApiResult<&dyn RegistrySigner> {
    state
        .signer
        .as_deref()
        .ok_or_else(|| unavailable("Signing key"))
}

fn parse_step(raw: &str) -> ApiResult<Step> {
    raw.parse().map_err(api_error)
}

// ─── Health ──────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    chain: bool,
    signer: Option<String>,
}

/// GET /health
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        chain: state.reader.is_some(),
        signer: state.signer.as_ref().map(|s| s.submitter()),
    })
}

pub fn health_routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

// ─── Projects ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CreateProjectRequest {
    project_id: String,
    #[serde(default)]
    meta: Map<String, Value>,
}

/// GET /api/projects
async fn list_projects(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<String>>> {
    state.workspace.list_projects().map(Json).map_err(api_error)
}

/// POST /api/projects
async fn create_project(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<ProjectManifest>)> {
    let _guard = state.write_lock.lock().await;
    let manifest = state
        .workspace
        .create_project(&req.project_id, req.meta)
        .map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(manifest)))
}

/// GET /api/projects/{project}
async fn get_project(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> ApiResult<Json<ProjectManifest>> {
    state
        .workspace
        .load_manifest(&project)
        .map(Json)
        .map_err(api_error)
}

pub fn project_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/projects", get(list_projects).post(create_project))
        .route("/api/projects/{project}", get(get_project))
}

// ─── Snapshots ───────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct CaptureRequest {
    step: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct AnchorParams {
    #[serde(default)]
    force: bool,
}

/// GET /api/projects/{project}/snapshots
async fn list_snapshots(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
) -> ApiResult<Json<Vec<SnapshotListing>>> {
    pipeline::list_snapshots(&state.workspace, &project)
        .map(Json)
        .map_err(api_error)
}

/// POST /api/projects/{project}/snapshots
async fn capture_snapshot(
    State(state): State<Arc<AppState>>,
    Path(project): Path<String>,
    Json(req): Json<CaptureRequest>,
) -> ApiResult<(StatusCode, Json<CaptureResult>)> {
    let step = parse_step(&req.step)?;
    let _guard = state.write_lock.lock().await;
    let result =
        pipeline::capture(&state.workspace, &project, step, req.fields).map_err(api_error)?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// POST /api/projects/{project}/snapshots/{step}/{file}/anchor?force=
async fn anchor_snapshot(
    State(state): State<Arc<AppState>>,
    Path((project, step, file)): Path<(String, String, String)>,
    Query(params): Query<AnchorParams>,
) -> ApiResult<Json<AnchorResult>> {
    let signer = signer(&state)?;
    let step = parse_step(&step)?;
    let path = state
        .workspace
        .snapshot_path(&project, step, &file)
        .map_err(api_error)?;

    let _guard = state.write_lock.lock().await;
    pipeline::anchor(&state.workspace, &project, &path, signer, params.force)
        .await
        .map(Json)
        .map_err(api_error)
}

/// GET /api/projects/{project}/snapshots/{step}/{file}/verify
async fn verify_snapshot(
    State(state): State<Arc<AppState>>,
    Path((project, step, file)): Path<(String, String, String)>,
) -> ApiResult<Json<Verification>> {
    let reader = reader(&state)?;
    let step = parse_step(&step)?;
    let path = state
        .workspace
        .snapshot_path(&project, step, &file)
        .map_err(api_error)?;

    pipeline::verify(&path, reader)
        .await
        .map(Json)
        .map_err(api_error)
}

pub fn snapshot_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/projects/{project}/snapshots",
            get(list_snapshots).post(capture_snapshot),
        )
        .route(
            "/api/projects/{project}/snapshots/{step}/{file}/anchor",
            post(anchor_snapshot),
        )
        .route(
            "/api/projects/{project}/snapshots/{step}/{file}/verify",
            get(verify_snapshot),
        )
}

// ─── Ledger ──────────────────────────────────────────────

/// GET /api/ledger?from_block=&to_block=
async fn ledger(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LedgerQuery>,
) -> ApiResult<Json<Vec<LedgerEntry>>> {
    reader(&state)?
        .logged_events(query)
        .await
        .map(Json)
        .map_err(api_error)
}

pub fn ledger_routes() -> Router<Arc<AppState>> {
    Router::new().route("/api/ledger", get(ledger))
}

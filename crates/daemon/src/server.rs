use std::sync::{Arc, Mutex};

use axum::body::{Body, Bytes};
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use dbvault_core::{ArchiveKind, BackupError, ErrorKind, RestoreProgress, RetentionPolicy};
use dbvault_exec::ProgressFn;
use dbvault_storage::BackupManager;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::error;

use crate::scheduler::Scheduler;

const DEFAULT_ACTOR: &str = "api";
const DOWNLOAD_CHUNK: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<BackupManager>,
    pub scheduler: Arc<Scheduler>,
    /// Latest progress of the current or most recent restore.
    pub restore_progress: Arc<Mutex<Option<RestoreProgress>>>,
    /// Thresholds for on-demand cleanup when the request names none.
    pub retention: RetentionPolicy,
    pub csrf_token: Option<String>,
    pub api_token: Option<String>,
}

impl AppState {
    pub fn new(manager: Arc<BackupManager>, scheduler: Arc<Scheduler>) -> Self {
        Self {
            manager,
            scheduler,
            restore_progress: Arc::new(Mutex::new(None)),
            retention: RetentionPolicy::new(30, 5),
            csrf_token: None,
            api_token: None,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/healthz", get(healthz))
        .route("/api/v1/backups", get(list_backups).post(create_backup))
        .route("/api/v1/backups/stats", get(backup_stats))
        .route("/api/v1/backups/cleanup", post(cleanup_backups))
        .route("/api/v1/backups/{filename}", delete(delete_backup))
        .route("/api/v1/backups/{filename}/download", get(download_backup))
        .route("/api/v1/backups/{filename}/restore", post(restore_backup))
        .route("/api/v1/restore/progress", get(restore_progress))
        .route("/api/v1/audit", get(audit_trail))
        .route("/api/v1/schedule", get(schedule_status))
        .route("/api/v1/schedule/restart", post(restart_schedule))
        .with_state(state)
}

/// Handler failure: either a bare status (auth) or a domain error.
#[derive(Debug)]
pub enum ApiError {
    Status(StatusCode),
    Backup(BackupError),
    Internal(anyhow::Error),
}

impl From<StatusCode> for ApiError {
    fn from(status: StatusCode) -> Self {
        ApiError::Status(status)
    }
}

impl From<BackupError> for ApiError {
    fn from(err: BackupError) -> Self {
        ApiError::Backup(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Subprocess => StatusCode::BAD_GATEWAY,
        ErrorKind::Filesystem => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Status(status) => status.into_response(),
            ApiError::Backup(err) => {
                let status = status_for(err.kind());
                let body = serde_json::json!({
                    "error": err.to_string(),
                    "safety_backup_filename": err.safety_backup_filename(),
                });
                (status, Json(body)).into_response()
            }
            ApiError::Internal(err) => {
                error!(error = %format!("{err:#}"), "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
struct HealthzResponse {
    status: &'static str,
}

async fn healthz() -> Json<HealthzResponse> {
    Json(HealthzResponse { status: "ok" })
}

fn require_api_auth(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = &state.api_token else {
        return Ok(());
    };

    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => Ok(()),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

fn require_csrf(state: &AppState, headers: &HeaderMap) -> Result<(), StatusCode> {
    let Some(expected) = &state.csrf_token else {
        return Ok(());
    };
    let provided = headers
        .get("x-csrf-token")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided == expected {
        Ok(())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

fn actor(headers: &HeaderMap) -> String {
    headers
        .get("x-actor")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_ACTOR)
        .to_owned()
}

async fn list_backups(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_api_auth(&state, &headers)?;
    let archives = state.manager.list()?;
    Ok(Json(serde_json::json!(archives)))
}

async fn backup_stats(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_api_auth(&state, &headers)?;
    Ok(Json(serde_json::json!(state.manager.dir_stats()?)))
}

async fn create_backup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    require_api_auth(&state, &headers)?;
    require_csrf(&state, &headers)?;
    let archive = state
        .manager
        .create(ArchiveKind::Manual, &actor(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(serde_json::json!(archive))))
}

async fn delete_backup(
    Path(filename): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    require_api_auth(&state, &headers)?;
    require_csrf(&state, &headers)?;
    state.manager.delete(&filename, &actor(&headers)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download_backup(
    Path(filename): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    require_api_auth(&state, &headers)?;
    let download = state.manager.download(&filename, &actor(&headers)).await?;
    let file = tokio::fs::File::open(&download.path)
        .await
        .map_err(|e| BackupError::fs(format!("open {}", download.path.display()), e))?;

    let disposition = HeaderValue::from_str(&format!(
        "attachment; filename=\"{}\"",
        download.archive.filename
    ))
    .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let mut response = Body::from_stream(file_chunks(file)).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/sql"),
    );
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(download.archive.size_bytes),
    );
    Ok(response)
}

/// Reads `file` in fixed-size chunks so large archives are never held in memory.
fn file_chunks(
    file: tokio::fs::File,
) -> impl futures_util::Stream<Item = std::io::Result<Bytes>> + Send + 'static {
    stream::try_unfold(file, |mut file| async move {
        let mut buf = vec![0u8; DOWNLOAD_CHUNK];
        let n = file.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok::<_, std::io::Error>(Some((Bytes::from(buf), file)))
    })
}

/// Runs the restore on its own task. A dropped request must not cancel it:
/// once the database is dropped the load has to finish and be audited.
async fn restore_backup(
    Path(filename): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_api_auth(&state, &headers)?;
    require_csrf(&state, &headers)?;

    let manager = state.manager.clone();
    let slot = state.restore_progress.clone();
    let actor = actor(&headers);
    let task = tokio::spawn(async move {
        let report = move |progress: RestoreProgress| {
            *slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(progress);
        };
        manager
            .restore(&filename, &actor, Some(&report as &ProgressFn<'_>))
            .await
    });
    let outcome = task
        .await
        .map_err(|e| anyhow::anyhow!("restore task failed: {e}"))??;
    Ok(Json(serde_json::json!(outcome)))
}

async fn restore_progress(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<Option<RestoreProgress>>> {
    require_api_auth(&state, &headers)?;
    let progress = state
        .restore_progress
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone();
    Ok(Json(progress))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CleanupRequest {
    retention_days: Option<u32>,
    min_retained: Option<usize>,
}

async fn cleanup_backups(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    require_api_auth(&state, &headers)?;
    require_csrf(&state, &headers)?;
    let request: CleanupRequest = if body.is_empty() {
        CleanupRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|_| StatusCode::BAD_REQUEST)?
    };
    let decision = state
        .manager
        .cleanup(
            request
                .retention_days
                .unwrap_or(state.retention.retention_days),
            request.min_retained.unwrap_or(state.retention.min_retained),
            &actor(&headers),
        )
        .await?;
    Ok(Json(serde_json::json!(decision)))
}

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
    /// Only entries naming this archive, as target or safety backup.
    filename: Option<String>,
}

async fn audit_trail(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AuditQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    require_api_auth(&state, &headers)?;
    let limit = query.limit.unwrap_or(100).min(1000);
    let entries = match query.filename {
        Some(filename) => {
            state.manager.store().codec().validate(&filename)?;
            let mut entries = state.manager.audit_for(&filename).await?;
            entries.truncate(limit);
            entries
        }
        None => state.manager.audit_trail(limit).await?,
    };
    Ok(Json(serde_json::json!(entries)))
}

async fn schedule_status(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_api_auth(&state, &headers)?;
    let config = state.scheduler.current_config()?;
    Ok(Json(serde_json::json!({
        "scheduler": state.scheduler.state(),
        "config": config,
    })))
}

async fn restart_schedule(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<serde_json::Value>> {
    require_api_auth(&state, &headers)?;
    require_csrf(&state, &headers)?;
    let scheduler = state.scheduler.restart().await?;
    Ok(Json(serde_json::json!({ "scheduler": scheduler })))
}

//! Axum routes: command submission, event streams, and result downloads.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{
        HeaderName, HeaderValue,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
    },
    response::{
        IntoResponse,
        sse::{Event, Sse},
    },
    routing::{get, post},
};
use secrecy::SecretString;
use serde::Serialize;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use super::auth::Authorized;
use super::error::ApiError;
use crate::error::SubmitError;
use crate::jobs::{JobService, StreamConfig, StreamFrame, Submission, publish};
use crate::workspace::{Upload, sanitize_file_name};

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<JobService>,
    /// Shared worker token.
    pub token: Arc<SecretString>,
    pub stream: StreamConfig,
    /// Request body limit for submissions.
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(service: Arc<JobService>, token: SecretString) -> Self {
        Self {
            service,
            token: Arc::new(token),
            stream: StreamConfig::default(),
            max_upload_bytes: 512 * 1024 * 1024,
        }
    }

    pub fn with_stream_config(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_max_upload_bytes(mut self, limit: usize) -> Self {
        self.max_upload_bytes = limit;
        self
    }
}

/// Build the worker's HTTP router.
pub fn router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;
    Router::new()
        .route("/", get(index))
        .route("/api/health", get(health))
        .route("/api/commands", post(create_command))
        .route("/api/commands/{id}/stream", get(stream_command))
        .route("/uploads/{id}/{filename}", get(download_result))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ── Status ──────────────────────────────────────────────────────────────

async fn index() -> impl IntoResponse {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "status": "online",
        "ready": true
    }))
}

async fn health(_auth: Authorized) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Worker is running"
    }))
}

// ── Commands ────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CommandCreated {
    command_id: Uuid,
}

async fn create_command(
    State(state): State<AppState>,
    _auth: Authorized,
    mut multipart: Multipart,
) -> Result<Json<CommandCreated>, ApiError> {
    let mut submission = Submission::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| SubmitError::Malformed(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| SubmitError::Malformed(e.to_string()))?;

        match name.as_str() {
            "type" => submission.kind = String::from_utf8_lossy(&bytes).into_owned(),
            "params" => submission.params = Some(String::from_utf8_lossy(&bytes).into_owned()),
            "file" => submission.artifact = Some(Upload::new(file_name, bytes.to_vec())),
            "wordlist" => submission.wordlist = Some(Upload::new(file_name, bytes.to_vec())),
            _ => {}
        }
    }

    let kind = submission.kind.clone();
    let id = state.service.submit(submission).await?;
    info!(job_id = %id, kind = %kind, "Command submitted");
    Ok(Json(CommandCreated { command_id: id }))
}

async fn stream_command(
    State(state): State<AppState>,
    _auth: Authorized,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::NotFound("Command not found".into());
    let id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    let frames = publish(Arc::clone(state.service.store()), id, state.stream.clone())
        .await
        .ok_or_else(not_found)?;

    let padding: Arc<str> = " ".repeat(state.stream.padding).into();
    let events = frames.map(move |frame| Ok::<_, Infallible>(render(frame, &padding)));

    let headers = [
        (CACHE_CONTROL, HeaderValue::from_static("no-cache, no-transform")),
        (X_ACCEL_BUFFERING, HeaderValue::from_static("no")),
    ];
    Ok((headers, Sse::new(events)))
}

/// Render a frame as an SSE event. Data frames carry `padding` after the
/// JSON so proxies flush them instead of buffering.
fn render(frame: StreamFrame, padding: &str) -> Event {
    match frame {
        StreamFrame::Connected { job_id, retry } => Event::default()
            .event("connected")
            .retry(retry)
            .data(serde_json::json!({ "jobId": job_id }).to_string()),
        StreamFrame::Log(entry) => Event::default().event("log").data(format!(
            "{}{padding}",
            serde_json::to_string(&entry).unwrap_or_default()
        )),
        StreamFrame::Done(done) => Event::default().event("done").data(format!(
            "{}{padding}",
            serde_json::to_string(&done).unwrap_or_default()
        )),
        StreamFrame::KeepAlive => Event::default().comment(format!("hb{padding}")),
    }
}

// ── Downloads ───────────────────────────────────────────────────────────

async fn download_result(
    State(state): State<AppState>,
    _auth: Authorized,
    Path((id, filename)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || ApiError::NotFound("File not found".into());
    let id = Uuid::parse_str(&id).map_err(|_| not_found())?;
    let path = state.service.result_artifact(id).await?;
    let bytes = tokio::fs::read(&path).await.map_err(|_| not_found())?;

    let stored_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let download_name = sanitize_file_name(&filename, &stored_name);
    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{download_name}\""))
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(job_id = %id, file = %download_name, size = bytes.len(), "Serving result");
    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    ))
}

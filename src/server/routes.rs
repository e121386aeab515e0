use std::collections::HashMap;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use hyper::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use super::AppState;
use super::middleware;
use crate::sandbox::SandboxError;

type ApiError = (StatusCode, Json<Value>);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/version", get(version))
        .route("/v1/vm/create", post(create_vm))
        .route("/v1/vm/start", post(start_vm))
        .route("/v1/vm/stop", post(stop_vm))
        .fallback(not_found)
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::request_span_middleware))
}

async fn not_found(req: axum::extract::Request) -> impl IntoResponse {
    tracing::warn!("unhandled path: {}", req.uri());
    (StatusCode::NOT_FOUND, "Not Found")
}

/// Map a lifecycle error to its HTTP status and `{error, kind}` body.
pub fn error_response(err: SandboxError) -> ApiError {
    let status = match &err {
        SandboxError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        SandboxError::NotFound(_) => StatusCode::NOT_FOUND,
        SandboxError::AlreadyExists(_) => StatusCode::CONFLICT,
        SandboxError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        // Client closed request
        SandboxError::Cancelled => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
        }
        SandboxError::Provider(_)
        | SandboxError::State(_)
        | SandboxError::NetworkSetup(_)
        | SandboxError::Proxy(_) => StatusCode::BAD_GATEWAY,
        SandboxError::PartialFailure(_)
        | SandboxError::Io(_)
        | SandboxError::Serde(_)
        | SandboxError::Config(_)
        | SandboxError::UnknownBackend(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(json!({ "error": err.to_string(), "kind": err.kind() })),
    )
}

// --- Health & version ---

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "backend": state.service.backend().as_str(),
        "sandboxes": state.service.registry().len().await,
    }))
}

async fn version(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "version": state.service.version() }))
}

// --- Lifecycle ---

#[derive(Debug, Deserialize)]
pub struct CreateVmRequest {
    pub id: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub network_namespace_path: String,
}

#[derive(Debug, Deserialize)]
pub struct SandboxRef {
    pub id: String,
}

#[tracing::instrument(skip_all, fields(sandbox_id = %body.id))]
async fn create_vm(
    State(state): State<AppState>,
    Json(body): Json<CreateVmRequest>,
) -> Result<Json<Value>, ApiError> {
    let socket = state
        .service
        .create_vm(&body.id, &body.annotations, &body.network_namespace_path)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({ "agent_socket_path": socket.display().to_string() })))
}

/// StartVM runs in its own task. If the client goes away the handler future
/// is dropped, the drop guard fires and the task sees cancellation.
#[tracing::instrument(skip_all, fields(sandbox_id = %body.id))]
async fn start_vm(
    State(state): State<AppState>,
    Json(body): Json<SandboxRef>,
) -> Result<Json<Value>, ApiError> {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let service = state.service.clone();
    let id = body.id;
    let task = tokio::spawn(async move { service.start_vm(&id, &cancel).await });

    match task.await {
        Ok(Ok(())) => Ok(Json(json!({}))),
        Ok(Err(e)) => Err(error_response(e)),
        Err(e) => {
            tracing::error!(error = %e, "StartVM task panicked or was aborted");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("StartVM task failed: {e}"), "kind": "internal" })),
            ))
        }
    }
}

#[tracing::instrument(skip_all, fields(sandbox_id = %body.id))]
async fn stop_vm(
    State(state): State<AppState>,
    Json(body): Json<SandboxRef>,
) -> Result<Json<Value>, ApiError> {
    state
        .service
        .stop_vm(&body.id)
        .await
        .map_err(error_response)?;
    Ok(Json(json!({})))
}

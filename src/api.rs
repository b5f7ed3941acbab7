//! API / Admission (C10): the REST surface workflows are submitted
//! through and inspected via.

use crate::dataref::DataReference;
use crate::dockerinfo::EndpointDirectory;
use crate::engine::Engine;
use crate::queue::TaskQueue;
use crate::state::{TaskState, WorkflowState};
use crate::store::StateStore;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub store: Arc<dyn StateStore>,
    pub queue: Arc<dyn TaskQueue>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/workflows", post(submit_workflow))
        .route("/workflows/:id", get(get_workflow))
        .route("/workflows/:id", delete(delete_workflow))
        .route("/workflows/:id/tasks", get(list_tasks))
        .route("/workflows/:id/tasks/:task_id", get(get_task))
        .route("/health", get(health))
        .with_state(state)
}

/// Binds and serves the router, shutting down gracefully on ctrl-c — the
/// same `axum::serve` + graceful-shutdown shape the reference crate's HTTP
/// listener uses.
pub async fn serve(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    let listener = TcpListener::bind((host, port)).await?;
    tracing::info!(host, port, "API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct WorkflowSubmitRequest {
    blueprint: serde_json::Value,
    dockerinfo: serde_json::Value,
    #[serde(default)]
    inputs: Vec<DataReference>,
}

#[derive(Debug, Serialize)]
struct WorkflowSubmitResponse {
    workflow_id: String,
    status: String,
}

#[derive(Debug, Serialize)]
struct TaskListResponse {
    tasks: Vec<TaskState>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

enum ApiError {
    BadRequest(String),
    UnprocessableEntity(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::UnprocessableEntity(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message),
            ApiError::Internal(message) => {
                tracing::error!(%message, "internal API error");
                (StatusCode::INTERNAL_SERVER_ERROR, message)
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<crate::store::Error> for ApiError {
    fn from(err: crate::store::Error) -> Self {
        match err {
            crate::store::Error::WorkflowNotFound { .. } | crate::store::Error::TaskNotFound { .. } => {
                ApiError::NotFound(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<crate::engine::Error> for ApiError {
    fn from(err: crate::engine::Error) -> Self {
        match err {
            crate::engine::Error::Store { source } => source.into(),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

async fn submit_workflow(
    State(state): State<AppState>,
    body: Json<serde_json::Value>,
) -> Result<impl IntoResponse, ApiError> {
    let request: WorkflowSubmitRequest = serde_json::from_value(body.0)
        .map_err(|e| ApiError::UnprocessableEntity(e.to_string()))?;

    if request.blueprint.is_null() {
        return Err(ApiError::UnprocessableEntity("blueprint is required".to_string()));
    }
    if request.dockerinfo.is_null() {
        return Err(ApiError::UnprocessableEntity("dockerinfo is required".to_string()));
    }

    let graph = crate::blueprint::parse_json(request.blueprint)
        .map_err(|e| ApiError::BadRequest(format!("Invalid blueprint: {e}")))?;
    let endpoints: EndpointDirectory = crate::dockerinfo::parse_json(request.dockerinfo)
        .map_err(|e| ApiError::BadRequest(format!("Invalid dockerinfo: {e}")))?;

    let workflow_id = format!("wf-{}", &uuid::Uuid::new_v4().simple().to_string()[..12]);

    state.store.save_endpoints(&workflow_id, endpoints).await?;
    state.engine.initialize(&workflow_id, &graph).await?;

    let initial_inputs = (!request.inputs.is_empty()).then_some(request.inputs);
    state.engine.start(&workflow_id, initial_inputs).await?;

    Ok(Json(WorkflowSubmitResponse {
        workflow_id,
        status: "running".to_string(),
    }))
}

async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowState>, ApiError> {
    Ok(Json(state.store.get_workflow(&id).await?))
}

async fn list_tasks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let tasks = state.store.get_workflow_tasks(&id).await?;
    Ok(Json(TaskListResponse { tasks }))
}

async fn get_task(
    State(state): State<AppState>,
    Path((id, task_id)): Path<(String, String)>,
) -> Result<Json<TaskState>, ApiError> {
    Ok(Json(state.store.get_task(&id, &task_id).await?))
}

async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.store.get_workflow(&id).await?;
    state.queue.clear_queue(&id).await.map_err(|e| ApiError::Internal(e.to_string()))?;
    state.store.delete_workflow(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::mem::InMemoryTaskQueue;
    use crate::store::mem::InMemoryStateStore;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryTaskQueue::new());
        let engine = Arc::new(Engine::new(store.clone(), queue.clone()));
        AppState { engine, store, queue }
    }

    #[tokio::test]
    async fn health_returns_ok() {
        let app = router(test_state());
        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn unknown_workflow_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/workflows/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submit_with_missing_blueprint_is_422() {
        let app = router(test_state());
        let body = serde_json::json!({"dockerinfo": {"docker_info_list": []}}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/workflows")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn delete_of_missing_workflow_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/workflows/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn submit_valid_single_node_workflow_runs() {
        let app = router(test_state());
        let blueprint = serde_json::json!({
            "name": "n",
            "pipeline_id": "p",
            "creation_date": "2024-01-01",
            "type": "pipeline",
            "version": "1",
            "nodes": [{
                "container_name": "svc",
                "proto_uri": "svc.proto",
                "image": "svc:latest",
                "node_type": "task",
                "operation_signature_list": [{
                    "operation_signature": {"operation_name": "Process"},
                    "connected_to": []
                }]
            }]
        });
        let dockerinfo = serde_json::json!({
            "docker_info_list": [{"container_name": "svc", "ip_address": "127.0.0.1", "port": "8080"}]
        });
        let body = serde_json::json!({"blueprint": blueprint, "dockerinfo": dockerinfo}).to_string();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/workflows")
                    .header("content-type", "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

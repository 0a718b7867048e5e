//! API route definitions.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::error::ApiError;
use super::state::AppState;
use crate::task::{AnalysisResult, ExecutionResult, TaskStatus, TestConfig};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/execute-test", post(execute_test))
        .route("/task-status/{task_id}", get(task_status))
        .route("/task-results/{task_id}", get(task_results))
        .route("/analyze-results/{task_id}", post(analyze_results))
        .route("/tasks", get(list_tasks))
        .route("/agent-thoughts/{task_id}", get(agent_thoughts))
        .route("/health", get(health))
}

async fn execute_test(
    State(state): State<AppState>,
    Json(config): Json<TestConfig>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let task_id = state.registry.submit(config).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "task_id": task_id,
            "status": "queued",
            "message": "Task queued for execution",
            "check_status_url": format!("/api/v1/task-status/{task_id}"),
        })),
    ))
}

async fn task_status(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<TaskStatus>, ApiError> {
    Ok(Json(state.registry.status(&task_id).await?))
}

async fn task_results(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<ExecutionResult>, ApiError> {
    Ok(Json(state.registry.result(&task_id).await?))
}

async fn analyze_results(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<Json<AnalysisResult>, ApiError> {
    Ok(Json(state.registry.analyze(&task_id).await?))
}

async fn list_tasks(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let tasks = state.registry.list().await?;
    Ok(Json(json!({ "tasks": tasks })))
}

async fn agent_thoughts(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<String, ApiError> {
    let thoughts = state.registry.agent_thoughts(&task_id).await?;
    Ok(thoughts.unwrap_or_else(|| "No agent thoughts recorded for this task.".to_string()))
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn banner() -> Json<Value> {
    Json(json!({
        "service": "sitepilot",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "POST /api/v1/execute-test",
            "GET  /api/v1/task-status/{task_id}",
            "GET  /api/v1/task-results/{task_id}",
            "POST /api/v1/analyze-results/{task_id}",
            "GET  /api/v1/tasks",
            "GET  /api/v1/agent-thoughts/{task_id}",
            "GET  /api/v1/health",
            "GET  /screenshots/{filename}",
        ],
    }))
}

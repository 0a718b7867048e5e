//! HTTP surface tests: routes, status codes, and response shapes, driven
//! through the router without a socket.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use sitepilot::agent::{AgentRun, AgentRunner, CapturedShot, RecordedStep};
use sitepilot::analysis::Analyzer;
use sitepilot::api;
use sitepilot::api::state::AppState;
use sitepilot::artifacts::ArtifactStore;
use sitepilot::config::AgentConfig;
use sitepilot::registry::{MemoryStore, Registry, TaskStore};
use sitepilot::task::{ConversationEntry, TestConfig};

const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot-a-real-image";

/// Completes immediately with one navigation, one screenshot, and a short
/// conversation log.
struct ScriptedAgent;

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn run(&self, _task_id: &str, config: &TestConfig) -> anyhow::Result<AgentRun> {
        let now = Utc::now();
        Ok(AgentRun {
            steps: vec![
                RecordedStep {
                    action: format!("navigate to {}", config.target_url),
                    result: "HTTP 200".to_string(),
                    timestamp: now,
                    screenshot: None,
                },
                RecordedStep {
                    action: "screenshot: landing page".to_string(),
                    result: "captured screenshot landing.png".to_string(),
                    timestamp: now,
                    screenshot: Some(CapturedShot {
                        filename: "landing.png".to_string(),
                        png: FAKE_PNG.to_vec(),
                    }),
                },
            ],
            conversation: vec![ConversationEntry {
                step: 1,
                timestamp: now,
                content: "model chose to navigate".to_string(),
            }],
            summary: "task done".to_string(),
        })
    }
}

/// Never finishes; tasks stay running for as long as the test needs.
struct StuckAgent;

#[async_trait]
impl AgentRunner for StuckAgent {
    async fn run(&self, _task_id: &str, _config: &TestConfig) -> anyhow::Result<AgentRun> {
        futures::future::pending().await
    }
}

fn app_with(dir: &TempDir, agent: Arc<dyn AgentRunner>) -> Router {
    let artifacts = ArtifactStore::open(dir.path().join("operation_logs")).unwrap();
    let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new(64));
    // Unroutable analyzer endpoint: analysis falls back to the compliance
    // review, which is what these tests assert on.
    let agent_cfg = AgentConfig {
        endpoint: "http://127.0.0.1:1/v1/chat/completions".to_string(),
        ..AgentConfig::default()
    };
    let analyzer = Analyzer::new(&agent_cfg, artifacts.clone()).unwrap();
    let registry = Arc::new(Registry::new(store, agent, artifacts, analyzer, 4));
    api::router(AppState { registry })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn get(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post_json(app: &Router, uri: &str, body: Value) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn post_empty(app: &Router, uri: &str) -> axum::response::Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

/// Submit a valid task and return its id.
async fn submit(app: &Router) -> String {
    let response = post_json(
        app,
        "/api/v1/execute-test",
        serde_json::json!({
            "target_url": "https://example.com",
            "task_description": "check the landing page",
            "screenshot_instructions": [
                {"step_description": "landing page", "filename": "landing.png"}
            ]
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body = body_json(response).await;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["message"], "Task queued for execution");
    let task_id = body["task_id"].as_str().unwrap().to_string();
    assert_eq!(
        body["check_status_url"],
        format!("/api/v1/task-status/{task_id}")
    );
    task_id
}

/// Poll until the task leaves its non-terminal states.
async fn wait_terminal(app: &Router, task_id: &str) -> Value {
    for _ in 0..200 {
        let response = get(app, &format!("/api/v1/task-status/{task_id}")).await;
        assert_eq!(response.status(), StatusCode::OK);
        let status = body_json(response).await;
        match status["status"].as_str().unwrap() {
            "completed" | "failed" => return status,
            _ => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    panic!("task {task_id} never reached a terminal state");
}

#[tokio::test]
async fn test_submit_poll_fetch_roundtrip() {
    let dir = TempDir::new().unwrap();
    let app = app_with(&dir, Arc::new(ScriptedAgent));

    let task_id = submit(&app).await;
    let status = wait_terminal(&app, &task_id).await;
    assert_eq!(status["status"], "completed");
    assert!(status["end_time"].is_string());

    let response = get(&app, &format!("/api/v1/task-results/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["task_id"], task_id.as_str());
    assert_eq!(result["success"], true);
    assert_eq!(result["screenshots"][0], "/screenshots/landing.png");
    assert_eq!(result["execution_steps"][1]["screenshot"], "/screenshots/landing.png");
    assert_eq!(result["task_details"]["target_url"], "https://example.com");

    // The captured file is served from the screenshots mount.
    let response = get(&app, "/screenshots/landing.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&bytes[..], FAKE_PNG);
}

#[tokio::test]
async fn test_invalid_submission_is_422_with_detail() {
    let dir = TempDir::new().unwrap();
    let app = app_with(&dir, Arc::new(ScriptedAgent));

    let response = post_json(
        &app,
        "/api/v1/execute-test",
        serde_json::json!({"target_url": "", "task_description": "x"}),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "target_url must not be empty");
}

#[tokio::test]
async fn test_unknown_task_is_404() {
    let dir = TempDir::new().unwrap();
    let app = app_with(&dir, Arc::new(ScriptedAgent));

    for uri in [
        "/api/v1/task-status/task_missing",
        "/api/v1/task-results/task_missing",
        "/api/v1/agent-thoughts/task_missing",
    ] {
        let response = get(&app, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{uri}");
    }
    let response = post_empty(&app, "/api/v1/analyze-results/task_missing").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["detail"], "Task not found");
}

#[tokio::test]
async fn test_results_before_completion_are_409() {
    let dir = TempDir::new().unwrap();
    let app = app_with(&dir, Arc::new(StuckAgent));

    let task_id = submit(&app).await;
    // Give the stuck run a chance to start; it parks forever either way.
    tokio::time::sleep(Duration::from_millis(20)).await;

    let response = get(&app, &format!("/api/v1/task-status/{task_id}")).await;
    let status = body_json(response).await;
    assert!(matches!(
        status["status"].as_str().unwrap(),
        "queued" | "running"
    ));

    let response = get(&app, &format!("/api/v1/task-results/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = body_json(response).await;
    let detail = body["detail"].as_str().unwrap();
    assert!(detail.contains(&task_id), "detail was: {detail}");
    assert!(detail.contains("still"), "detail was: {detail}");
}

#[tokio::test]
async fn test_analysis_of_completed_task() {
    let dir = TempDir::new().unwrap();
    let app = app_with(&dir, Arc::new(ScriptedAgent));

    let task_id = submit(&app).await;
    wait_terminal(&app, &task_id).await;

    let response = post_empty(&app, &format!("/api/v1/analyze-results/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["task_id"], task_id.as_str());
    // The model endpoint is unreachable, so the content is the built-in
    // compliance review.
    let content = body["analysis_content"].as_str().unwrap();
    assert!(content.contains("Test Review"), "content was: {content}");
}

#[tokio::test]
async fn test_agent_thoughts_roundtrip() {
    let dir = TempDir::new().unwrap();
    let app = app_with(&dir, Arc::new(ScriptedAgent));

    let task_id = submit(&app).await;
    wait_terminal(&app, &task_id).await;

    let response = get(&app, &format!("/api/v1/agent-thoughts/{task_id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("model chose to navigate"), "text was: {text}");
}

#[tokio::test]
async fn test_task_listing_shape() {
    let dir = TempDir::new().unwrap();
    let app = app_with(&dir, Arc::new(ScriptedAgent));

    let first = submit(&app).await;
    wait_terminal(&app, &first).await;
    let second = submit(&app).await;
    wait_terminal(&app, &second).await;

    let response = get(&app, "/api/v1/tasks").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let tasks = body["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    for task in tasks {
        assert!(task["task_id"].as_str().unwrap().starts_with("task_"));
        assert_eq!(task["status"], "completed");
    }
}

#[tokio::test]
async fn test_health_and_banner() {
    let dir = TempDir::new().unwrap();
    let app = app_with(&dir, Arc::new(ScriptedAgent));

    let response = get(&app, "/api/v1/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());

    let response = get(&app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["service"], "sitepilot");

    let response = get(&app, "/no-such-route").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

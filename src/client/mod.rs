//! Client-side pieces: a typed API client, the status poller that watches
//! a submitted task to its terminal state, and the saved-workflow library.

pub mod poller;
pub mod workflows;

pub use poller::{PollEvent, StatusPoller, WatchHandle};
pub use workflows::WorkflowLibrary;

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::task::{AnalysisResult, ExecutionResult, TaskStatus, TaskSummary, TestConfig};

#[derive(Debug, Error)]
pub enum ClientError {
    /// Network-level failure. The poller retries these.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    /// The server answered with a non-success status. Not retried.
    #[error("server returned {status}: {detail}")]
    Api { status: u16, detail: String },
}

pub struct TestClient {
    http: reqwest::Client,
    base: String,
}

impl TestClient {
    pub fn new(base: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base)
    }

    pub async fn submit(&self, config: &TestConfig) -> Result<String, ClientError> {
        #[derive(Deserialize)]
        struct SubmitReply {
            task_id: String,
        }
        let resp = self
            .http
            .post(self.url("/execute-test"))
            .json(config)
            .send()
            .await?;
        let reply: SubmitReply = parse(resp).await?;
        Ok(reply.task_id)
    }

    pub async fn status(&self, task_id: &str) -> Result<TaskStatus, ClientError> {
        let resp = self
            .http
            .get(self.url(&format!("/task-status/{task_id}")))
            .send()
            .await?;
        parse(resp).await
    }

    pub async fn result(&self, task_id: &str) -> Result<ExecutionResult, ClientError> {
        let resp = self
            .http
            .get(self.url(&format!("/task-results/{task_id}")))
            .send()
            .await?;
        parse(resp).await
    }

    pub async fn analyze(&self, task_id: &str) -> Result<AnalysisResult, ClientError> {
        let resp = self
            .http
            .post(self.url(&format!("/analyze-results/{task_id}")))
            .send()
            .await?;
        parse(resp).await
    }

    pub async fn tasks(&self) -> Result<Vec<TaskSummary>, ClientError> {
        #[derive(Deserialize)]
        struct TasksReply {
            tasks: Vec<TaskSummary>,
        }
        let resp = self.http.get(self.url("/tasks")).send().await?;
        let reply: TasksReply = parse(resp).await?;
        Ok(reply.tasks)
    }

    pub async fn agent_thoughts(&self, task_id: &str) -> Result<String, ClientError> {
        let resp = self
            .http
            .get(self.url(&format!("/agent-thoughts/{task_id}")))
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() {
            Ok(resp.text().await?)
        } else {
            Err(api_error(status, resp).await)
        }
    }

    pub async fn health(&self) -> Result<bool, ClientError> {
        let resp = self.http.get(self.url("/health")).send().await?;
        Ok(resp.status().is_success())
    }
}

async fn parse<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp.json::<T>().await?)
    } else {
        Err(api_error(status, resp).await)
    }
}

/// Pull the `detail` string out of an error body, falling back to the
/// status line when the body is not ours.
async fn api_error(status: reqwest::StatusCode, resp: reqwest::Response) -> ClientError {
    let detail = resp
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|v| v["detail"].as_str().map(str::to_string))
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        });
    ClientError::Api {
        status: status.as_u16(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_submit_returns_task_id() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/api/v1/execute-test")
                    .json_body_partial(r#"{"target_url": "https://example.com"}"#);
                then.status(202).json_body(serde_json::json!({
                    "task_id": "task_abc",
                    "status": "queued",
                    "message": "Task queued for execution"
                }));
            })
            .await;

        let client = TestClient::new(server.base_url()).unwrap();
        let config = TestConfig::new("https://example.com", "verify");
        assert_eq!(client.submit(&config).await.unwrap(), "task_abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_api_errors_carry_detail() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/task-status/task_gone");
                then.status(404)
                    .json_body(serde_json::json!({"detail": "Task not found"}));
            })
            .await;

        let client = TestClient::new(server.base_url()).unwrap();
        match client.status("task_gone").await.unwrap_err() {
            ClientError::Api { status, detail } => {
                assert_eq!(status, 404);
                assert_eq!(detail, "Task not found");
            }
            other => panic!("expected api error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport() {
        let client = TestClient::new("http://127.0.0.1:1").unwrap();
        assert!(matches!(
            client.health().await,
            Err(ClientError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_status_deserializes() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/api/v1/task-status/task_x");
                then.status(200).json_body(serde_json::json!({
                    "task_id": "task_x",
                    "status": "running",
                    "progress": "executing automation task"
                }));
            })
            .await;

        let client = TestClient::new(server.base_url()).unwrap();
        let status = client.status("task_x").await.unwrap();
        assert_eq!(status.status, crate::task::TaskState::Running);
        assert_eq!(status.progress.as_deref(), Some("executing automation task"));
    }
}

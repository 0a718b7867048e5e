//! End-to-end over a real socket: serve the app, then drive it with the
//! bundled client and poller the way the CLI does.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tempfile::TempDir;

use sitepilot::agent::{AgentRun, AgentRunner, CapturedShot, RecordedStep};
use sitepilot::analysis::Analyzer;
use sitepilot::api;
use sitepilot::api::state::AppState;
use sitepilot::artifacts::ArtifactStore;
use sitepilot::client::{PollEvent, StatusPoller, TestClient};
use sitepilot::config::{AgentConfig, PollConfig};
use sitepilot::registry::{MemoryStore, Registry, TaskStore};
use sitepilot::task::{ConversationEntry, TestConfig};

const FAKE_PNG: &[u8] = b"\x89PNG\r\n\x1a\nnot-a-real-image";

struct ScriptedAgent;

#[async_trait]
impl AgentRunner for ScriptedAgent {
    async fn run(&self, _task_id: &str, config: &TestConfig) -> anyhow::Result<AgentRun> {
        let now = Utc::now();
        Ok(AgentRun {
            steps: vec![RecordedStep {
                action: format!("navigate to {}", config.target_url),
                result: "HTTP 200".to_string(),
                timestamp: now,
                screenshot: Some(CapturedShot {
                    filename: "front.png".to_string(),
                    png: FAKE_PNG.to_vec(),
                }),
            }],
            conversation: vec![ConversationEntry {
                step: 1,
                timestamp: now,
                content: "navigating to the target".to_string(),
            }],
            summary: "all checks passed".to_string(),
        })
    }
}

async fn start_server(dir: &TempDir) -> String {
    let artifacts = ArtifactStore::open(dir.path().join("operation_logs")).unwrap();
    let store: Arc<dyn TaskStore> = Arc::new(MemoryStore::new(64));
    let agent_cfg = AgentConfig {
        endpoint: "http://127.0.0.1:1/v1/chat/completions".to_string(),
        ..AgentConfig::default()
    };
    let analyzer = Analyzer::new(&agent_cfg, artifacts.clone()).unwrap();
    let registry = Arc::new(Registry::new(
        store,
        Arc::new(ScriptedAgent),
        artifacts,
        analyzer,
        4,
    ));
    let app = api::router(AppState { registry });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_full_roundtrip_through_client() {
    let dir = TempDir::new().unwrap();
    let base = start_server(&dir).await;

    let client = TestClient::new(&base).unwrap();
    assert!(client.health().await.unwrap());

    let config = TestConfig::new("https://example.com", "verify the front page loads");
    let poll_cfg = PollConfig {
        interval_secs: 1,
        max_transport_failures: 3,
    };
    let poller = StatusPoller::new(TestClient::new(&base).unwrap(), poll_cfg);
    let mut watch = poller.watch(config);

    let task_id = match watch.next_event().await {
        Some(PollEvent::Submitted { task_id }) => task_id,
        other => panic!("expected submitted, got {other:?}"),
    };

    let result = loop {
        match watch.next_event().await {
            Some(PollEvent::Status(_)) => continue,
            Some(PollEvent::Completed(result)) => break result,
            other => panic!("expected progress or completion, got {other:?}"),
        }
    };
    assert_eq!(result.task_id, task_id);
    assert!(result.success);
    assert_eq!(result.screenshots, vec!["/screenshots/front.png"]);

    // Artifacts round out the result: analysis, thoughts, served screenshot.
    let analysis = client.analyze(&task_id).await.unwrap();
    assert_eq!(analysis.task_id, task_id);
    assert!(analysis.analysis_content.contains("Test Review"));

    let thoughts = client.agent_thoughts(&task_id).await.unwrap();
    assert!(thoughts.contains("navigating to the target"));

    let png = reqwest::get(format!("{base}/screenshots/front.png"))
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(&png[..], FAKE_PNG);

    let tasks = client.tasks().await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_id, task_id);
}

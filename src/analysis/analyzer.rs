//! Post-hoc analysis: deterministic review plus a model-written narrative.
//!
//! The compliance review always runs and is persisted. The model narrative
//! is best-effort on connectivity: an unreachable endpoint degrades to the
//! rendered review, while a reachable endpoint that rejects the request is
//! surfaced to the caller as an upstream failure.

use anyhow::Context;
use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use super::compliance;
use crate::agent::llm::{LlmClient, LlmError};
use crate::agent::protocol::ChatMessage;
use crate::artifacts::ArtifactStore;
use crate::config::AgentConfig;
use crate::task::{AnalysisResult, ExecutionResult, TestConfig};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis model failed: {0}")]
    Upstream(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub struct Analyzer {
    llm: LlmClient,
    artifacts: ArtifactStore,
}

impl Analyzer {
    pub fn new(cfg: &AgentConfig, artifacts: ArtifactStore) -> anyhow::Result<Self> {
        Ok(Self {
            llm: LlmClient::new(cfg)?,
            artifacts,
        })
    }

    pub async fn analyze(
        &self,
        config: &TestConfig,
        result: &ExecutionResult,
    ) -> Result<AnalysisResult, AnalysisError> {
        let report = compliance::review(config, result);

        let report_json =
            serde_json::to_string_pretty(&report).context("failed to serialize review report")?;
        if let Err(e) = self.artifacts.write_review(&result.task_id, &report_json) {
            warn!(task_id = %result.task_id, "could not persist review report: {e:#}");
        }

        let prompt = analysis_prompt(config, result, &report_json)?;
        let messages = [
            ChatMessage::system(
                "You are a website testing analysis expert. Analyze browser automation \
                 results and provide a comprehensive report: success/failure assessment, \
                 compliance with the original instructions, screenshot validation, and \
                 actionable recommendations.",
            ),
            ChatMessage::user(prompt),
        ];

        let content = match self.llm.chat(&messages, None).await {
            Ok(content) => content,
            Err(LlmError::Transport(e)) => {
                warn!(task_id = %result.task_id, "analysis model unreachable, using review report: {e}");
                report.render_text()
            }
            Err(e) => return Err(AnalysisError::Upstream(e.to_string())),
        };

        info!(task_id = %result.task_id, "analysis generated");
        Ok(AnalysisResult {
            task_id: result.task_id.clone(),
            analysis_content: content,
            timestamp: Utc::now(),
        })
    }
}

fn analysis_prompt(
    config: &TestConfig,
    result: &ExecutionResult,
    report_json: &str,
) -> anyhow::Result<String> {
    let instructions =
        serde_json::to_string_pretty(config).context("failed to serialize instructions")?;
    let results =
        serde_json::to_string_pretty(result).context("failed to serialize execution results")?;
    Ok(format!(
        "Please analyze the following browser automation execution results.\n\n\
         **Original Instructions:**\n{instructions}\n\n\
         **Execution Results:**\n{results}\n\n\
         **Compliance Review:**\n{report_json}\n\n\
         Cover: execution success/failure assessment, compliance with the original \
         instructions, screenshot capture validation, task completion verification, \
         and recommendations for improvement. Provide a detailed analysis report."
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use tempfile::tempdir;

    fn sample() -> (TestConfig, ExecutionResult) {
        let config = TestConfig::new("https://example.com", "verify the homepage");
        let result = ExecutionResult {
            task_id: "task_an".to_string(),
            success: true,
            timestamp: Utc::now(),
            task_details: config.clone(),
            execution_steps: vec![],
            screenshots: vec![],
            conversation: vec![],
            error: None,
            log_file: None,
        };
        (config, result)
    }

    fn analyzer_for(endpoint: String, dir: &std::path::Path) -> Analyzer {
        let cfg = AgentConfig {
            endpoint,
            api_key_env: "SITEPILOT_TEST_KEY_UNSET".to_string(),
            ..AgentConfig::default()
        };
        Analyzer::new(&cfg, ArtifactStore::open(dir).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_model_narrative_wins() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_contains("Original Instructions");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"content": "The run looks healthy."}}]
                }));
            })
            .await;

        let dir = tempdir().unwrap();
        let analyzer = analyzer_for(server.url("/v1/chat/completions"), dir.path());
        let (config, result) = sample();

        let analysis = analyzer.analyze(&config, &result).await.unwrap();
        assert_eq!(analysis.analysis_content, "The run looks healthy.");
        assert_eq!(analysis.task_id, "task_an");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_unreachable_model_degrades_to_review() {
        let dir = tempdir().unwrap();
        // nothing listens on port 1
        let analyzer =
            analyzer_for("http://127.0.0.1:1/v1/chat/completions".to_string(), dir.path());
        let (config, result) = sample();

        let analysis = analyzer.analyze(&config, &result).await.unwrap();
        assert!(analysis.analysis_content.contains("Compliance"));
        assert!(analysis.analysis_content.contains("task_an"));
    }

    #[tokio::test]
    async fn test_rejected_request_is_upstream_error() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(401).body("bad key");
            })
            .await;

        let dir = tempdir().unwrap();
        let analyzer = analyzer_for(server.url("/v1/chat/completions"), dir.path());
        let (config, result) = sample();

        let err = analyzer.analyze(&config, &result).await.unwrap_err();
        assert!(matches!(err, AnalysisError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_review_report_persisted() {
        let dir = tempdir().unwrap();
        let analyzer =
            analyzer_for("http://127.0.0.1:1/v1/chat/completions".to_string(), dir.path());
        let (config, result) = sample();
        analyzer.analyze(&config, &result).await.unwrap();

        let reviews: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.file_name()
                    .to_string_lossy()
                    .starts_with("review_report_task_an")
            })
            .collect();
        assert_eq!(reviews.len(), 1);
    }
}

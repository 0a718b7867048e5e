//! OpenAI-compatible chat completions client.
//!
//! Works against any backend speaking the `/v1/chat/completions` shape:
//! hosted Gemini/OpenAI gateways or a local llama.cpp server. Thinking
//! models that put their text in `reasoning_content` are handled too.

use base64::Engine;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::protocol::ChatMessage;
use crate::config::AgentConfig;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("llm endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm reply had no usable content: {0}")]
    EmptyReply(String),
}

pub struct LlmClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    max_tokens: u32,
}

impl LlmClient {
    pub fn new(cfg: &AgentConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.step_timeout_secs))
            .user_agent(cfg.user_agent.clone())
            .build()?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.clone(),
            model: cfg.model.clone(),
            api_key: cfg.api_key(),
            max_tokens: cfg.max_tokens,
        })
    }

    /// One completion round. `image` attaches a PNG to the final user
    /// message as a data URL so vision models see the captured page.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        image: Option<&[u8]>,
    ) -> Result<String, LlmError> {
        let payload = build_request(&self.model, self.max_tokens, messages, image);

        let mut req = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: truncate(&body, 300),
            });
        }

        let body: serde_json::Value = resp.json().await?;
        extract_content(&body)
    }
}

fn build_request(
    model: &str,
    max_tokens: u32,
    messages: &[ChatMessage],
    image: Option<&[u8]>,
) -> serde_json::Value {
    let mut rendered: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| serde_json::json!({"role": m.role, "content": m.content}))
        .collect();

    if let Some(png) = image {
        let encoded = base64::engine::general_purpose::STANDARD.encode(png);
        let data_url = format!("data:image/png;base64,{encoded}");
        // rewrite the last user message into multimodal parts
        if let Some(last) = rendered.iter_mut().rev().find(|m| m["role"] == "user") {
            let text = last["content"].as_str().unwrap_or_default().to_string();
            last["content"] = serde_json::json!([
                {"type": "image_url", "image_url": {"url": data_url}},
                {"type": "text", "text": text},
            ]);
        }
    }

    serde_json::json!({
        "model": model,
        "messages": rendered,
        "max_tokens": max_tokens,
    })
}

/// Pull the assistant text out of a completions response, falling back to
/// `reasoning_content` for thinking models that leave `content` empty.
fn extract_content(body: &serde_json::Value) -> Result<String, LlmError> {
    let message = &body["choices"][0]["message"];
    let content = message["content"].as_str().unwrap_or("");
    if !content.is_empty() {
        return Ok(content.to_string());
    }
    let reasoning = message["reasoning_content"].as_str().unwrap_or("");
    if !reasoning.is_empty() {
        debug!("llm reply carried only reasoning_content");
        return Ok(reasoning.to_string());
    }
    Err(LlmError::EmptyReply(truncate(&body.to_string(), 300)))
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &s[..cut])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client_for(server: &MockServer) -> LlmClient {
        let cfg = AgentConfig {
            endpoint: server.url("/v1/chat/completions"),
            api_key_env: "SITEPILOT_TEST_KEY_UNSET".to_string(),
            ..AgentConfig::default()
        };
        LlmClient::new(&cfg).unwrap()
    }

    #[tokio::test]
    async fn test_chat_returns_content() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .json_body_partial(r#"{"model": "gemini-2.0-flash"}"#);
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"content": "hello there"}}]
                }));
            })
            .await;

        let reply = client_for(&server)
            .chat(&[ChatMessage::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(reply, "hello there");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_falls_back_to_reasoning_content() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"content": "", "reasoning_content": "thinking out loud"}}]
                }));
            })
            .await;

        let reply = client_for(&server)
            .chat(&[ChatMessage::user("hi")], None)
            .await
            .unwrap();
        assert_eq!(reply, "thinking out loud");
    }

    #[tokio::test]
    async fn test_chat_surfaces_http_errors() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/v1/chat/completions");
                then.status(429).body("rate limited");
            })
            .await;

        let err = client_for(&server)
            .chat(&[ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        match err {
            LlmError::Status { status, body } => {
                assert_eq!(status, 429);
                assert!(body.contains("rate limited"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_image_rewrites_last_user_message() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/v1/chat/completions")
                    .body_contains("data:image/png;base64,");
                then.status(200).json_body(serde_json::json!({
                    "choices": [{"message": {"content": "I see a page"}}]
                }));
            })
            .await;

        let reply = client_for(&server)
            .chat(
                &[ChatMessage::user("describe this capture")],
                Some(&[0x89, 0x50, 0x4e, 0x47]),
            )
            .await
            .unwrap();
        assert_eq!(reply, "I see a page");
        mock.assert_async().await;
    }

    #[test]
    fn test_extract_content_rejects_empty() {
        let body = serde_json::json!({"choices": [{"message": {"content": ""}}]});
        assert!(matches!(
            extract_content(&body),
            Err(LlmError::EmptyReply(_))
        ));
    }
}

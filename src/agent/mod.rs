//! Browser automation agent.
//!
//! A task run is a conversation loop: the model proposes one action per
//! turn, the browsing engine executes it, and the observation goes back as
//! the next user message. [`AgentRunner`] is the seam the task registry
//! drives; tests swap in scripted runners.

pub mod browser;
pub mod driver;
pub mod llm;
pub mod protocol;
pub mod snapshot;

pub use driver::LlmBrowserAgent;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::task::{ConversationEntry, TestConfig};

/// A PNG captured mid-run, not yet persisted.
#[derive(Debug, Clone)]
pub struct CapturedShot {
    pub filename: String,
    pub png: Vec<u8>,
}

/// One executed action and what came back.
#[derive(Debug, Clone)]
pub struct RecordedStep {
    pub action: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
    pub screenshot: Option<CapturedShot>,
}

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct AgentRun {
    pub steps: Vec<RecordedStep>,
    pub conversation: Vec<ConversationEntry>,
    pub summary: String,
}

#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Execute one task to completion. An error means the task failed.
    async fn run(&self, task_id: &str, config: &TestConfig) -> anyhow::Result<AgentRun>;
}

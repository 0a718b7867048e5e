//! Injectable task store abstraction.
//!
//! The registry never touches a concrete backend: tests run on
//! [`MemoryStore`](super::memory::MemoryStore), durable deployments on
//! [`SqliteStore`](super::sqlite::SqliteStore). The executing job is the
//! sole writer of its own entry; pollers only read.

use async_trait::async_trait;
use thiserror::Error;

use crate::task::{AnalysisResult, ExecutionResult, TaskStatus, TaskSummary, TestConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task '{0}' not found")]
    NotFound(String),
    #[error("task '{0}' already exists")]
    Duplicate(String),
    #[error("invalid status transition for task '{task_id}': {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: crate::task::TaskState,
        to: crate::task::TaskState,
    },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Task lifecycle storage. Implementations enforce monotonic transitions
/// (`queued -> running -> {completed, failed}`) and bound their growth by
/// evicting the oldest terminal entries beyond a retention cap.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Register a freshly submitted task in state `queued`.
    async fn insert(&self, status: TaskStatus, config: TestConfig) -> Result<(), StoreError>;

    /// Current lifecycle snapshot.
    async fn get_status(&self, task_id: &str) -> Result<TaskStatus, StoreError>;

    /// The config as submitted, for execution and analysis.
    async fn get_config(&self, task_id: &str) -> Result<TestConfig, StoreError>;

    /// `queued -> running`.
    async fn mark_running(&self, task_id: &str) -> Result<(), StoreError>;

    /// Update the human-readable progress line. No-op once terminal.
    async fn set_progress(&self, task_id: &str, progress: &str) -> Result<(), StoreError>;

    /// `running -> completed`, storing the immutable result.
    async fn complete(&self, task_id: &str, result: ExecutionResult) -> Result<(), StoreError>;

    /// `{queued, running} -> failed`, capturing the error on the status.
    async fn fail(&self, task_id: &str, error: &str) -> Result<(), StoreError>;

    /// Stored result, if the task has one (only `completed` tasks do).
    async fn get_result(&self, task_id: &str) -> Result<Option<ExecutionResult>, StoreError>;

    /// Cached analysis, if one was computed.
    async fn get_analysis(&self, task_id: &str) -> Result<Option<AnalysisResult>, StoreError>;

    /// Cache an analysis. Overwrites any previous one for the task.
    async fn put_analysis(&self, analysis: AnalysisResult) -> Result<(), StoreError>;

    /// All known tasks, newest first.
    async fn list(&self) -> Result<Vec<TaskSummary>, StoreError>;
}

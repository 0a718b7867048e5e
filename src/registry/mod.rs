//! Task registry: the server-side contract for submitting tests, polling
//! their lifecycle, fetching results, and requesting analysis.
//!
//! Submission validates, assigns an id, records the task as `queued`, and
//! returns immediately; a spawned job does the actual work under a worker
//! semaphore. Results exist only for `completed` tasks. Failed tasks carry
//! their error on the status record instead.

pub mod memory;
pub mod runner;
pub mod sqlite;
pub mod store;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use store::{StoreError, TaskStore};

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::info;

use crate::agent::AgentRunner;
use crate::analysis::{AnalysisError, Analyzer};
use crate::artifacts::ArtifactStore;
use crate::task::{
    new_task_id, AnalysisResult, ExecutionResult, TaskState, TaskStatus, TaskSummary, TestConfig,
    ValidationError,
};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("task '{0}' not found")]
    NotFound(String),
    #[error("task '{task_id}' is still {status}")]
    NotReady { task_id: String, status: TaskState },
    #[error("analysis failed: {0}")]
    Analysis(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for RegistryError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => RegistryError::NotFound(id),
            other => RegistryError::Internal(anyhow::anyhow!(other)),
        }
    }
}

pub struct Registry {
    store: Arc<dyn TaskStore>,
    agent: Arc<dyn AgentRunner>,
    artifacts: ArtifactStore,
    analyzer: Analyzer,
    workers: Arc<Semaphore>,
}

impl Registry {
    pub fn new(
        store: Arc<dyn TaskStore>,
        agent: Arc<dyn AgentRunner>,
        artifacts: ArtifactStore,
        analyzer: Analyzer,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            agent,
            artifacts,
            analyzer,
            workers: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Validate and accept a task. Returns the assigned id; execution
    /// happens on a spawned job.
    pub async fn submit(&self, config: TestConfig) -> Result<String, RegistryError> {
        config.validate()?;
        let task_id = new_task_id();
        self.store
            .insert(TaskStatus::queued(&task_id), config.clone())
            .await?;
        info!(%task_id, target = %config.target_url, "task accepted");

        tokio::spawn(runner::execute_task(
            self.store.clone(),
            self.agent.clone(),
            self.artifacts.clone(),
            self.workers.clone(),
            task_id.clone(),
            config,
        ));

        Ok(task_id)
    }

    pub async fn status(&self, task_id: &str) -> Result<TaskStatus, RegistryError> {
        Ok(self.store.get_status(task_id).await?)
    }

    /// The execution record. Only `completed` tasks have one; anything
    /// else is `NotReady` so pollers keep waiting or read the error off
    /// the status.
    pub async fn result(&self, task_id: &str) -> Result<ExecutionResult, RegistryError> {
        let status = self.store.get_status(task_id).await?;
        if status.status != TaskState::Completed {
            return Err(RegistryError::NotReady {
                task_id: task_id.to_string(),
                status: status.status,
            });
        }
        match self.store.get_result(task_id).await? {
            Some(result) => Ok(result),
            None => Err(RegistryError::Internal(anyhow::anyhow!(
                "completed task '{task_id}' has no stored result"
            ))),
        }
    }

    /// Analysis of a completed task. Cached: repeated requests return the
    /// first computed report.
    pub async fn analyze(&self, task_id: &str) -> Result<AnalysisResult, RegistryError> {
        if let Some(cached) = self.store.get_analysis(task_id).await? {
            return Ok(cached);
        }

        let result = self.result(task_id).await?;
        let config = self.store.get_config(task_id).await?;

        let analysis = self
            .analyzer
            .analyze(&config, &result)
            .await
            .map_err(|e| match e {
                AnalysisError::Upstream(msg) => RegistryError::Analysis(msg),
                AnalysisError::Internal(err) => RegistryError::Internal(err),
            })?;

        self.store.put_analysis(analysis.clone()).await?;
        Ok(analysis)
    }

    pub async fn list(&self) -> Result<Vec<TaskSummary>, RegistryError> {
        Ok(self.store.list().await?)
    }

    /// The model's step-by-step replies for a task, if the run got far
    /// enough to write them.
    pub async fn agent_thoughts(&self, task_id: &str) -> Result<Option<String>, RegistryError> {
        // surface NotFound for unknown ids before touching the filesystem
        self.store.get_status(task_id).await?;
        Ok(self.artifacts.read_thoughts(task_id)?)
    }

    pub fn screenshots_dir(&self) -> &std::path::Path {
        self.artifacts.screenshots_dir()
    }
}

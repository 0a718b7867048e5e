//! In-memory task store.
//!
//! The default backend: a guarded map, matching the single-process polling
//! contract. Critical sections are short and never held across awaits, so
//! concurrent status reads of different tasks do not contend for long.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;
use tracing::debug;

use super::store::{StoreError, TaskStore};
use crate::task::{
    AnalysisResult, ExecutionResult, TaskState, TaskStatus, TaskSummary, TestConfig,
};

struct Entry {
    status: TaskStatus,
    config: TestConfig,
    result: Option<ExecutionResult>,
    analysis: Option<AnalysisResult>,
}

pub struct MemoryStore {
    inner: RwLock<Inner>,
    retention: usize,
}

struct Inner {
    tasks: HashMap<String, Entry>,
    /// Submission order, for listing and for evicting the oldest terminal entries.
    order: Vec<String>,
    terminal: VecDeque<String>,
}

impl MemoryStore {
    pub fn new(retention: usize) -> Self {
        Self {
            inner: RwLock::new(Inner {
                tasks: HashMap::new(),
                order: Vec::new(),
                terminal: VecDeque::new(),
            }),
            retention: retention.max(1),
        }
    }

    fn lock_write(&self) -> std::sync::RwLockWriteGuard<'_, Inner> {
        // Lock poisoning only happens if a writer panicked mid-update; the
        // runner catches panics before they reach the store, so recover
        // rather than cascade.
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_read(&self) -> std::sync::RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Record a terminal transition and evict beyond the retention cap.
    fn note_terminal(inner: &mut Inner, task_id: &str, retention: usize) {
        inner.terminal.push_back(task_id.to_string());
        while inner.terminal.len() > retention {
            if let Some(victim) = inner.terminal.pop_front() {
                inner.tasks.remove(&victim);
                inner.order.retain(|id| id != &victim);
                debug!(task_id = %victim, "evicted terminal task beyond retention cap");
            }
        }
    }

    fn transition(
        &self,
        task_id: &str,
        to: TaskState,
        apply: impl FnOnce(&mut Entry),
    ) -> Result<(), StoreError> {
        let mut inner = self.lock_write();
        let entry = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        let from = entry.status.status;
        if !from.can_transition(to) {
            return Err(StoreError::InvalidTransition {
                task_id: task_id.to_string(),
                from,
                to,
            });
        }
        entry.status.status = to;
        apply(entry);
        if to.is_terminal() {
            Self::note_terminal(&mut inner, task_id, self.retention);
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, status: TaskStatus, config: TestConfig) -> Result<(), StoreError> {
        let mut inner = self.lock_write();
        let task_id = status.task_id.clone();
        if inner.tasks.contains_key(&task_id) {
            return Err(StoreError::Duplicate(task_id));
        }
        inner.order.push(task_id.clone());
        inner.tasks.insert(
            task_id,
            Entry {
                status,
                config,
                result: None,
                analysis: None,
            },
        );
        Ok(())
    }

    async fn get_status(&self, task_id: &str) -> Result<TaskStatus, StoreError> {
        let inner = self.lock_read();
        inner
            .tasks
            .get(task_id)
            .map(|e| e.status.clone())
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    async fn get_config(&self, task_id: &str) -> Result<TestConfig, StoreError> {
        let inner = self.lock_read();
        inner
            .tasks
            .get(task_id)
            .map(|e| e.config.clone())
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))
    }

    async fn mark_running(&self, task_id: &str) -> Result<(), StoreError> {
        self.transition(task_id, TaskState::Running, |entry| {
            entry.status.progress = Some("initializing browser agent".to_string());
        })
    }

    async fn set_progress(&self, task_id: &str, progress: &str) -> Result<(), StoreError> {
        let mut inner = self.lock_write();
        let entry = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        if entry.status.status.is_terminal() {
            debug!(%task_id, "progress update after terminal state, ignored");
            return Ok(());
        }
        entry.status.progress = Some(progress.to_string());
        Ok(())
    }

    async fn complete(&self, task_id: &str, result: ExecutionResult) -> Result<(), StoreError> {
        self.transition(task_id, TaskState::Completed, |entry| {
            entry.status.end_time = Some(result.timestamp);
            entry.result = Some(result);
        })
    }

    async fn fail(&self, task_id: &str, error: &str) -> Result<(), StoreError> {
        self.transition(task_id, TaskState::Failed, |entry| {
            entry.status.error = Some(error.to_string());
            entry.status.end_time = Some(chrono::Utc::now());
        })
    }

    async fn get_result(&self, task_id: &str) -> Result<Option<ExecutionResult>, StoreError> {
        let inner = self.lock_read();
        let entry = inner
            .tasks
            .get(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        Ok(entry.result.clone())
    }

    async fn get_analysis(&self, task_id: &str) -> Result<Option<AnalysisResult>, StoreError> {
        let inner = self.lock_read();
        let entry = inner
            .tasks
            .get(task_id)
            .ok_or_else(|| StoreError::NotFound(task_id.to_string()))?;
        Ok(entry.analysis.clone())
    }

    async fn put_analysis(&self, analysis: AnalysisResult) -> Result<(), StoreError> {
        let mut inner = self.lock_write();
        let entry = inner
            .tasks
            .get_mut(&analysis.task_id)
            .ok_or_else(|| StoreError::NotFound(analysis.task_id.clone()))?;
        entry.analysis = Some(analysis);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<TaskSummary>, StoreError> {
        let inner = self.lock_read();
        Ok(inner
            .order
            .iter()
            .rev()
            .filter_map(|id| inner.tasks.get(id))
            .map(|e| TaskSummary {
                task_id: e.status.task_id.clone(),
                status: e.status.status,
                start_time: e.status.start_time,
                end_time: e.status.end_time,
            })
            .collect())
    }
}

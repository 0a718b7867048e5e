//! Core task data model: submitted configs, lifecycle status, execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Allocate a fresh task id. Opaque to clients; unique per submission.
pub fn new_task_id() -> String {
    format!("task_{}", uuid::Uuid::new_v4().simple())
}

/// Validation failures for a submitted [`TestConfig`].
///
/// These are user-correctable and reported synchronously at submission;
/// no task id is allocated when validation fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("target_url must not be empty")]
    EmptyTargetUrl,
    #[error("task_description must not be empty")]
    EmptyTaskDescription,
    #[error("screenshot_instructions[{index}] is half-filled: both step_description and filename are required")]
    PartialScreenshotInstruction { index: usize },
}

/// One requested screenshot: what moment to capture and the file to save it as.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreenshotInstruction {
    pub step_description: String,
    pub filename: String,
}

impl ScreenshotInstruction {
    /// Both fields blank -- treated as an empty pair and skipped by validation.
    pub fn is_empty(&self) -> bool {
        self.step_description.trim().is_empty() && self.filename.trim().is_empty()
    }
}

/// A user-submitted website testing task. Sent verbatim by clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestConfig {
    pub target_url: String,
    pub task_description: String,
    #[serde(default)]
    pub screenshot_instructions: Vec<ScreenshotInstruction>,
}

impl TestConfig {
    pub fn new(target_url: impl Into<String>, task_description: impl Into<String>) -> Self {
        Self {
            target_url: target_url.into(),
            task_description: task_description.into(),
            screenshot_instructions: Vec::new(),
        }
    }

    /// Check required fields. Empty screenshot pairs are tolerated (the UI
    /// submits blank rows); half-filled pairs are rejected.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.target_url.trim().is_empty() {
            return Err(ValidationError::EmptyTargetUrl);
        }
        if self.task_description.trim().is_empty() {
            return Err(ValidationError::EmptyTaskDescription);
        }
        for (index, instr) in self.screenshot_instructions.iter().enumerate() {
            if instr.is_empty() {
                continue;
            }
            if instr.step_description.trim().is_empty() || instr.filename.trim().is_empty() {
                return Err(ValidationError::PartialScreenshotInstruction { index });
            }
        }
        Ok(())
    }

    /// Screenshot instructions with blank rows dropped.
    pub fn effective_screenshots(&self) -> Vec<&ScreenshotInstruction> {
        self.screenshot_instructions
            .iter()
            .filter(|i| !i.is_empty())
            .collect()
    }
}

/// Lifecycle state of a task. Transitions are strictly monotonic:
/// `queued -> running -> {completed, failed}` (queued may also fail
/// directly when admission itself errors). Terminal states never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Completed,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }

    /// Valid lifecycle transitions. Everything else is a store bug.
    pub fn can_transition(self, to: TaskState) -> bool {
        matches!(
            (self, to),
            (TaskState::Queued, TaskState::Running)
                | (TaskState::Queued, TaskState::Failed)
                | (TaskState::Running, TaskState::Completed)
                | (TaskState::Running, TaskState::Failed)
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Running => write!(f, "running"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
        }
    }
}

impl std::str::FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(TaskState::Queued),
            "running" => Ok(TaskState::Running),
            "completed" => Ok(TaskState::Completed),
            "failed" => Ok(TaskState::Failed),
            other => Err(format!("unknown task state '{other}'")),
        }
    }
}

/// Point-in-time snapshot of a task's lifecycle, as returned to pollers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub task_id: String,
    pub status: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

impl TaskStatus {
    /// Fresh status for a just-submitted task.
    pub fn queued(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskState::Queued,
            progress: Some("task queued for execution".to_string()),
            error: None,
            start_time: Some(Utc::now()),
            end_time: None,
        }
    }
}

/// One recorded agent action/result pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStep {
    pub step_number: usize,
    pub action: String,
    pub result: String,
    pub timestamp: DateTime<Utc>,
    /// Opaque artifact reference (e.g. `/screenshots/<file>`), never inline bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screenshot: Option<String>,
}

/// One entry of the agent's conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub step: usize,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

/// Produced once, at the `completed` transition; immutable thereafter.
/// Tasks that fail carry their error on [`TaskStatus`] and get no result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
    pub task_details: TestConfig,
    pub execution_steps: Vec<ExecutionStep>,
    pub screenshots: Vec<String>,
    #[serde(default)]
    pub conversation: Vec<ConversationEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<String>,
}

/// Post-hoc analysis of a completed task. Cached per task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub task_id: String,
    pub analysis_content: String,
    pub timestamp: DateTime<Utc>,
}

/// Compact row for task listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub status: TaskState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
}

/// A named, client-side snapshot of a [`TestConfig`] for reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedWorkflow {
    pub id: String,
    pub name: String,
    pub config: TestConfig,
    pub created_at: DateTime<Utc>,
}

impl SavedWorkflow {
    pub fn new(name: impl Into<String>, config: TestConfig) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            config,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> TestConfig {
        TestConfig {
            target_url: "https://example.com".into(),
            task_description: "check homepage title".into(),
            screenshot_instructions: vec![],
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_blank_target_url_rejected() {
        let mut cfg = valid_config();
        cfg.target_url = "   ".into();
        assert_eq!(cfg.validate(), Err(ValidationError::EmptyTargetUrl));
    }

    #[test]
    fn test_blank_description_rejected() {
        let mut cfg = valid_config();
        cfg.task_description = String::new();
        assert_eq!(cfg.validate(), Err(ValidationError::EmptyTaskDescription));
    }

    #[test]
    fn test_half_filled_screenshot_rejected() {
        let mut cfg = valid_config();
        cfg.screenshot_instructions = vec![
            ScreenshotInstruction {
                step_description: "after search".into(),
                filename: "search.png".into(),
            },
            ScreenshotInstruction {
                step_description: String::new(),
                filename: "orphan.png".into(),
            },
        ];
        assert_eq!(
            cfg.validate(),
            Err(ValidationError::PartialScreenshotInstruction { index: 1 })
        );
    }

    #[test]
    fn test_fully_blank_screenshot_pair_tolerated() {
        let mut cfg = valid_config();
        cfg.screenshot_instructions = vec![ScreenshotInstruction::default()];
        assert!(cfg.validate().is_ok());
        assert!(cfg.effective_screenshots().is_empty());
    }

    #[test]
    fn test_state_transitions() {
        use TaskState::*;
        assert!(Queued.can_transition(Running));
        assert!(Queued.can_transition(Failed));
        assert!(Running.can_transition(Completed));
        assert!(Running.can_transition(Failed));

        assert!(!Queued.can_transition(Completed));
        assert!(!Running.can_transition(Queued));
        assert!(!Completed.can_transition(Failed));
        assert!(!Failed.can_transition(Running));
        assert!(!Completed.can_transition(Running));
    }

    #[test]
    fn test_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&TaskState::Queued).unwrap(), "\"queued\"");
        assert_eq!(serde_json::to_string(&TaskState::Failed).unwrap(), "\"failed\"");
        assert_eq!(
            serde_json::from_str::<TaskState>("\"running\"").unwrap(),
            TaskState::Running
        );
    }

    #[test]
    fn test_task_ids_unique() {
        let a = new_task_id();
        let b = new_task_id();
        assert_ne!(a, b);
        assert!(a.starts_with("task_"));
    }
}

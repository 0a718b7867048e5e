//! On-disk artifacts for executed tasks.
//!
//! Layout under the data directory:
//!
//! ```text
//! operation_logs/
//!   screenshots/<capture>.png            served at /screenshots/<capture>.png
//!   agent_thoughts_<task_id>.txt         model replies, step by step
//!   detailed_agent_log_<task_id>_<ts>.txt   full step/observation trace
//!   <task_id>_result.json                final execution record
//! ```
//!
//! Filenames that reach this module may come from the model, so every name
//! is sanitized before it touches the filesystem.

use anyhow::{Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::task::{ConversationEntry, ExecutionResult};

#[derive(Debug, Clone)]
pub struct SavedScreenshot {
    pub filename: String,
    /// URL path the API serves this capture under.
    pub url: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
    screenshots: PathBuf,
}

impl ArtifactStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let screenshots = root.join("screenshots");
        fs::create_dir_all(&screenshots)
            .with_context(|| format!("failed to create artifact dir {}", screenshots.display()))?;
        Ok(Self { root, screenshots })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn screenshots_dir(&self) -> &Path {
        &self.screenshots
    }

    pub fn save_screenshot(&self, filename: &str, png: &[u8]) -> Result<SavedScreenshot> {
        let mut name = sanitize_filename(filename);
        if !name.to_ascii_lowercase().ends_with(".png") {
            name.push_str(".png");
        }
        let path = self.screenshots.join(&name);
        fs::write(&path, png)
            .with_context(|| format!("failed to write screenshot {}", path.display()))?;
        debug!(%name, bytes = png.len(), "saved screenshot");
        Ok(SavedScreenshot {
            url: format!("/screenshots/{name}"),
            filename: name,
            path,
        })
    }

    /// Write the model's replies as the task's thoughts file.
    pub fn write_thoughts(
        &self,
        task_id: &str,
        conversation: &[ConversationEntry],
    ) -> Result<PathBuf> {
        let path = self.thoughts_path(task_id);
        let mut body = String::new();
        for entry in conversation {
            body.push_str(&format!(
                "[step {} @ {}]\n{}\n\n",
                entry.step,
                entry.timestamp.to_rfc3339(),
                entry.content.trim_end()
            ));
        }
        fs::write(&path, body)
            .with_context(|| format!("failed to write thoughts file {}", path.display()))?;
        Ok(path)
    }

    pub fn read_thoughts(&self, task_id: &str) -> Result<Option<String>> {
        let path = self.thoughts_path(task_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)
            .with_context(|| format!("failed to read thoughts file {}", path.display()))?;
        Ok(Some(content))
    }

    /// Full step/observation trace. Returns the path for `log_file`.
    pub fn write_detailed_log(&self, task_id: &str, lines: &[String]) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let name = format!(
            "detailed_agent_log_{}_{stamp}.txt",
            sanitize_filename(task_id)
        );
        let path = self.root.join(name);
        fs::write(&path, lines.join("\n"))
            .with_context(|| format!("failed to write agent log {}", path.display()))?;
        Ok(path)
    }

    /// Persist an analysis review report alongside the other task files.
    pub fn write_review(&self, task_id: &str, report_json: &str) -> Result<PathBuf> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S");
        let name = format!("review_report_{}_{stamp}.json", sanitize_filename(task_id));
        let path = self.root.join(name);
        fs::write(&path, report_json)
            .with_context(|| format!("failed to write review report {}", path.display()))?;
        Ok(path)
    }

    pub fn write_result(&self, result: &ExecutionResult) -> Result<PathBuf> {
        let name = format!("{}_result.json", sanitize_filename(&result.task_id));
        let path = self.root.join(name);
        let json = serde_json::to_string_pretty(result)?;
        fs::write(&path, json)
            .with_context(|| format!("failed to write result file {}", path.display()))?;
        Ok(path)
    }

    fn thoughts_path(&self, task_id: &str) -> PathBuf {
        self.root
            .join(format!("agent_thoughts_{}.txt", sanitize_filename(task_id)))
    }
}

/// Flatten an untrusted name to a safe basename: path separators and
/// anything outside `[A-Za-z0-9._-]` become `_`, leading dots are dropped.
pub fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.').to_string();
    if trimmed.is_empty() {
        "capture".to_string()
    } else {
        trimmed
    }
}

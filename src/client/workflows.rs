//! Saved workflows: named task configs kept in a local JSON file so a
//! recurring check can be re-submitted without retyping it.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::task::{SavedWorkflow, TestConfig};

pub struct WorkflowLibrary {
    path: PathBuf,
}

impl WorkflowLibrary {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Save `config` under `name`. Saving an existing name replaces its
    /// config but keeps the workflow id stable.
    pub fn save(&self, name: &str, config: TestConfig) -> Result<SavedWorkflow> {
        let mut workflows = self.load()?;
        let saved = match workflows.iter_mut().find(|w| w.name == name) {
            Some(existing) => {
                existing.config = config;
                existing.clone()
            }
            None => {
                let workflow = SavedWorkflow::new(name, config);
                workflows.push(workflow.clone());
                workflow
            }
        };
        self.store(&workflows)?;
        Ok(saved)
    }

    /// Look up by name first, then by id.
    pub fn get(&self, name_or_id: &str) -> Result<Option<SavedWorkflow>> {
        let workflows = self.load()?;
        Ok(workflows
            .iter()
            .find(|w| w.name == name_or_id)
            .or_else(|| workflows.iter().find(|w| w.id == name_or_id))
            .cloned())
    }

    pub fn list(&self) -> Result<Vec<SavedWorkflow>> {
        let mut workflows = self.load()?;
        workflows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workflows)
    }

    /// Returns whether anything was removed.
    pub fn remove(&self, name_or_id: &str) -> Result<bool> {
        let mut workflows = self.load()?;
        let before = workflows.len();
        workflows.retain(|w| w.name != name_or_id && w.id != name_or_id);
        if workflows.len() == before {
            return Ok(false);
        }
        self.store(&workflows)?;
        Ok(true)
    }

    fn load(&self) -> Result<Vec<SavedWorkflow>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading workflow library {}", self.path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing workflow library {}", self.path.display()))
    }

    fn store(&self, workflows: &[SavedWorkflow]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
        }
        let raw = serde_json::to_string_pretty(workflows)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("writing workflow library {}", self.path.display()))
    }
}

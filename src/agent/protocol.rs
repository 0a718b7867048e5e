//! Wire contract between the driver and the language model.
//!
//! The model replies with exactly one JSON object per turn. `parse_step`
//! tolerates markdown fences and prose around the object since models
//! routinely wrap their answers.

use serde::{Deserialize, Serialize};

/// A single atomic action the model asks the browser to perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Load a page by URL.
    Navigate { url: String },
    /// Follow a link on the current page by its visible text.
    Follow { link_text: String },
    /// Check whether the current page contains the given text.
    Find { text: String },
    /// Capture the current page. `filename` names which required
    /// screenshot this satisfies, when the task asked for one.
    Screenshot {
        description: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },
    /// Finish the task with a closing summary.
    Done { summary: String },
}

impl Step {
    /// Short human label for logs and step records.
    pub fn describe(&self) -> String {
        match self {
            Step::Navigate { url } => format!("navigate to {url}"),
            Step::Follow { link_text } => format!("follow link '{link_text}'"),
            Step::Find { text } => format!("find text '{text}'"),
            Step::Screenshot { description, .. } => format!("screenshot: {description}"),
            Step::Done { .. } => "done".to_string(),
        }
    }
}

/// One message in the conversation sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Extract the action object from a model reply.
///
/// Accepts a bare JSON object, a fenced ```json block, or an object embedded
/// in surrounding prose. Anything without a parseable object is an error.
pub fn parse_step(reply: &str) -> Result<Step, String> {
    let trimmed = reply.trim();

    // Fast path: the whole reply is the object.
    if let Ok(step) = serde_json::from_str::<Step>(trimmed) {
        return Ok(step);
    }

    let start = trimmed
        .find('{')
        .ok_or_else(|| "no JSON object in reply".to_string())?;
    let end = trimmed
        .rfind('}')
        .ok_or_else(|| "unterminated JSON object in reply".to_string())?;
    if end <= start {
        return Err("unterminated JSON object in reply".to_string());
    }

    serde_json::from_str::<Step>(&trimmed[start..=end]).map_err(|e| e.to_string())
}

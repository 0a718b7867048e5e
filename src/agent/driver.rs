//! The production agent: a language model driving the HTTP engine.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashSet;
use tracing::{debug, warn};

use super::browser::{BrowserEngine, HttpEngine, PageView};
use super::llm::LlmClient;
use super::protocol::{self, ChatMessage, Step};
use super::{AgentRun, AgentRunner, CapturedShot, RecordedStep};
use crate::config::AgentConfig;
use crate::task::{ConversationEntry, TestConfig};

/// Page text shown to the model per observation.
const EXCERPT_CHARS: usize = 4000;
/// Link texts listed per observation.
const LINKS_SHOWN: usize = 20;
/// Unparseable replies tolerated before the run is abandoned.
const MAX_OFF_PROTOCOL: usize = 3;

pub struct LlmBrowserAgent {
    llm: LlmClient,
    cfg: AgentConfig,
}

impl LlmBrowserAgent {
    pub fn new(cfg: AgentConfig) -> Result<Self> {
        Ok(Self {
            llm: LlmClient::new(&cfg)?,
            cfg,
        })
    }

    /// Run the action loop against the given engine. Public so tests can
    /// substitute a scripted engine for the HTTP one.
    pub async fn drive(
        &self,
        task_id: &str,
        config: &TestConfig,
        engine: &mut dyn BrowserEngine,
    ) -> Result<AgentRun> {
        let mut messages = vec![
            ChatMessage::system(system_prompt(config)),
            ChatMessage::user(format!(
                "Begin. Navigate to {} and work through the task.",
                config.target_url
            )),
        ];
        let mut steps: Vec<RecordedStep> = Vec::new();
        let mut conversation: Vec<ConversationEntry> = Vec::new();
        let mut used_names: HashSet<String> = HashSet::new();
        let mut pending_image: Option<Vec<u8>> = None;
        let mut off_protocol = 0usize;

        for step_no in 1..=self.cfg.max_steps {
            let image = pending_image.take();
            let reply = self
                .llm
                .chat(&messages, image.as_deref())
                .await
                .context("language model call failed")?;
            conversation.push(ConversationEntry {
                step: step_no,
                timestamp: Utc::now(),
                content: reply.clone(),
            });
            messages.push(ChatMessage::assistant(reply.clone()));

            let step = match protocol::parse_step(&reply) {
                Ok(step) => step,
                Err(e) => {
                    off_protocol += 1;
                    if off_protocol > MAX_OFF_PROTOCOL {
                        bail!("model kept replying off-protocol: {e}");
                    }
                    warn!(%task_id, step_no, error = %e, "unparseable model reply");
                    messages.push(ChatMessage::user(format!(
                        "That reply was not a single action object ({e}). \
                         Answer with exactly one JSON object and nothing else."
                    )));
                    continue;
                }
            };

            debug!(%task_id, step_no, action = %step.describe(), "executing step");

            let mut screenshot = None;
            let observation = match &step {
                Step::Navigate { url } => match engine.navigate(url).await {
                    Ok(page) => describe_page(&page),
                    Err(e) => format!("navigation failed: {e:#}"),
                },
                Step::Follow { link_text } => match engine.follow(link_text).await {
                    Ok(page) => describe_page(&page),
                    Err(e) => format!("could not follow link: {e:#}"),
                },
                Step::Find { text } => match engine.current() {
                    Some(page) if page.text.to_lowercase().contains(&text.to_lowercase()) => {
                        format!("found '{text}' on the current page")
                    }
                    Some(_) => format!("'{text}' is not on the current page"),
                    None => "no page loaded yet".to_string(),
                },
                Step::Screenshot {
                    description,
                    filename,
                } => match engine.render_current() {
                    Ok(png) => {
                        let name =
                            shot_name(task_id, step_no, filename.as_deref(), config, &used_names);
                        used_names.insert(name.clone());
                        pending_image = Some(png.clone());
                        screenshot = Some(CapturedShot {
                            filename: name.clone(),
                            png,
                        });
                        format!("captured screenshot {name}: {description}")
                    }
                    Err(e) => format!("screenshot failed: {e:#}"),
                },
                Step::Done { summary } => {
                    steps.push(RecordedStep {
                        action: step.describe(),
                        result: summary.clone(),
                        timestamp: Utc::now(),
                        screenshot: None,
                    });
                    return Ok(AgentRun {
                        steps,
                        conversation,
                        summary: summary.clone(),
                    });
                }
            };

            steps.push(RecordedStep {
                action: step.describe(),
                result: observation.clone(),
                timestamp: Utc::now(),
                screenshot,
            });
            messages.push(ChatMessage::user(observation));
        }

        bail!(
            "step limit of {} reached before the agent finished",
            self.cfg.max_steps
        )
    }
}

#[async_trait]
impl AgentRunner for LlmBrowserAgent {
    async fn run(&self, task_id: &str, config: &TestConfig) -> Result<AgentRun> {
        let mut engine = HttpEngine::new(&self.cfg)?;
        self.drive(task_id, config, &mut engine).await
    }
}

fn system_prompt(config: &TestConfig) -> String {
    let mut prompt = String::from(
        "You are a website testing agent driving a text-mode browser.\n\n",
    );
    prompt.push_str(&format!("Task: {}\n", config.task_description));
    prompt.push_str(&format!("Target: {}\n\n", config.target_url));

    let required = config.effective_screenshots();
    if required.is_empty() {
        prompt.push_str("No screenshots were requested.\n");
    } else {
        prompt.push_str("Required screenshots (use the exact filename in the screenshot action):\n");
        for inst in &required {
            prompt.push_str(&format!("- {}: {}\n", inst.filename, inst.step_description));
        }
    }

    prompt.push_str(
        "\nOne action per reply, as a single JSON object, nothing else:\n\
         {\"action\": \"navigate\", \"url\": \"https://...\"}\n\
         {\"action\": \"follow\", \"link_text\": \"About\"}\n\
         {\"action\": \"find\", \"text\": \"Welcome\"}\n\
         {\"action\": \"screenshot\", \"description\": \"what this shows\", \"filename\": \"name.png\"}\n\
         {\"action\": \"done\", \"summary\": \"what happened and whether the task succeeded\"}\n\
         \nCapture every required screenshot before you finish. When the task is\n\
         complete, or cannot proceed, reply with the done action.",
    );
    prompt
}

fn describe_page(page: &PageView) -> String {
    let links: Vec<&str> = page
        .links
        .iter()
        .take(LINKS_SHOWN)
        .map(|l| l.text.as_str())
        .collect();
    format!(
        "HTTP {} {}\ntitle: {}\nlinks: {}\ntext: {}",
        page.status,
        page.url,
        page.title,
        if links.is_empty() {
            "(none)".to_string()
        } else {
            links.join(" | ")
        },
        page.excerpt(EXCERPT_CHARS),
    )
}

/// Pick the on-disk name for a capture: the model's requested name when
/// fresh, else the next unclaimed required filename, else a synthesized
/// per-step name.
fn shot_name(
    task_id: &str,
    step_no: usize,
    requested: Option<&str>,
    config: &TestConfig,
    used: &HashSet<String>,
) -> String {
    if let Some(req) = requested {
        let name = ensure_png(crate::artifacts::sanitize_filename(req));
        if !used.contains(&name) {
            return name;
        }
    }
    for inst in config.effective_screenshots() {
        let name = ensure_png(crate::artifacts::sanitize_filename(&inst.filename));
        if !used.contains(&name) {
            return name;
        }
    }
    format!("{task_id}_step_{step_no}.png")
}

fn ensure_png(mut name: String) -> String {
    if !name.to_ascii_lowercase().ends_with(".png") {
        name.push_str(".png");
    }
    name
}

//! Service configuration: TOML file with serde defaults.
//!
//! Everything has a working default so `sitepilot serve` runs without a
//! config file. The LLM API key is never stored in the file -- `api_key_env`
//! names the environment variable to read it from.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_DATA_DIR: &str = "operation_logs";
pub const DEFAULT_LLM_ENDPOINT: &str = "http://127.0.0.1:8000/v1/chat/completions";
pub const DEFAULT_LLM_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_KEY_ENV: &str = "SITEPILOT_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub agent: AgentConfig,
    pub worker: WorkerConfig,
    pub poll: PollConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            agent: AgentConfig::default(),
            worker: WorkerConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address for the API server.
    pub bind: String,
    /// Root directory for task artifacts (screenshots, agent logs).
    pub data_dir: String,
    /// SQLite file for the durable task store. `None` keeps tasks in memory.
    pub database: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            data_dir: DEFAULT_DATA_DIR.to_string(),
            database: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// OpenAI-compatible chat completions endpoint.
    pub endpoint: String,
    /// Model name sent with every request.
    pub model: String,
    /// Environment variable holding the bearer key. Optional at runtime:
    /// local backends (llama.cpp and friends) accept keyless requests.
    pub api_key_env: String,
    /// Max tokens per completion.
    pub max_tokens: u32,
    /// Hard cap on agent steps per task.
    pub max_steps: usize,
    /// Per-step timeout (page fetch or LLM call), seconds.
    pub step_timeout_secs: u64,
    /// User-Agent header for page fetches.
    pub user_agent: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LLM_ENDPOINT.to_string(),
            model: DEFAULT_LLM_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            max_tokens: 1024,
            max_steps: 25,
            step_timeout_secs: 60,
            user_agent: format!("sitepilot/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl AgentConfig {
    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env).ok().filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Admission limit: tasks executing concurrently. Others wait in `queued`.
    pub max_concurrent: usize,
    /// Terminal tasks retained in the store before oldest-first eviction.
    pub retention: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            retention: 256,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Client poll interval, seconds.
    pub interval_secs: u64,
    /// Consecutive transport failures tolerated before a watch gives up.
    pub max_transport_failures: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            max_transport_failures: 5,
        }
    }
}

impl Config {
    /// Load a TOML config file. Missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }

    /// Load `path` if given, otherwise defaults.
    pub fn load_or_default(path: Option<&str>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}

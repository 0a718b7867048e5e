//! SitePilot -- AI-piloted website testing.
//!
//! Users submit a natural-language testing task against a target URL; a
//! language-model-driven browser agent works through it step by step,
//! capturing screenshots and a full reasoning log. Clients poll the task to
//! its terminal state, fetch the structured result, and can request a
//! post-hoc analysis of how the run went.

pub mod agent;
pub mod analysis;
pub mod api;
pub mod artifacts;
pub mod client;
pub mod config;
pub mod registry;
pub mod storage;
pub mod task;

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::config::Config;
use crate::registry::{Registry, TaskStore};

/// Start the SitePilot server: task registry, worker pool, and HTTP API.
pub async fn serve(cfg: Config) -> Result<()> {
    // 1. Artifact directories (screenshots, agent logs, reports)
    let artifacts = artifacts::ArtifactStore::open(&cfg.server.data_dir)?;

    // 2. Task store: SQLite when configured, in-memory otherwise
    let store: Arc<dyn TaskStore> = match &cfg.server.database {
        Some(path) => {
            tracing::info!(%path, "opening task database");
            let pool = storage::open_pool(path)?;
            Arc::new(registry::SqliteStore::new(pool, cfg.worker.retention))
        }
        None => Arc::new(registry::MemoryStore::new(cfg.worker.retention)),
    };

    // 3. Browser agent and results analyzer share the model endpoint
    let agent = Arc::new(agent::LlmBrowserAgent::new(cfg.agent.clone())?);
    let analyzer = analysis::Analyzer::new(&cfg.agent, artifacts.clone())?;

    let registry = Arc::new(Registry::new(
        store,
        agent,
        artifacts,
        analyzer,
        cfg.worker.max_concurrent,
    ));

    // 4. HTTP API
    let addr: std::net::SocketAddr = cfg
        .server
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cfg.server.bind))?;
    let app = api::router(api::state::AppState { registry });

    tracing::info!(%addr, model = %cfg.agent.model, "SitePilot listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! Executes one accepted task end to end.
//!
//! The flow mirrors the lifecycle the stores enforce: wait for a worker
//! slot while `queued`, flip to `running`, drive the agent, then land on
//! `completed` or `failed`. A refused transition means the task was evicted
//! or already finished, so store errors are logged, never retried.

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use super::store::TaskStore;
use crate::agent::{AgentRun, AgentRunner};
use crate::artifacts::ArtifactStore;
use crate::task::{ExecutionResult, ExecutionStep, TestConfig};

pub async fn execute_task(
    store: Arc<dyn TaskStore>,
    agent: Arc<dyn AgentRunner>,
    artifacts: ArtifactStore,
    workers: Arc<Semaphore>,
    task_id: String,
    config: TestConfig,
) {
    if let Err(e) = store
        .set_progress(&task_id, "waiting for a worker slot")
        .await
    {
        warn!(%task_id, "could not record queue progress: {e}");
    }

    let _permit = match workers.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            // semaphore closed, the server is shutting down
            let _ = store.fail(&task_id, "server shutting down").await;
            return;
        }
    };

    if let Err(e) = store.mark_running(&task_id).await {
        warn!(%task_id, "task no longer runnable: {e}");
        return;
    }
    info!(%task_id, "task running");

    if let Err(e) = store
        .set_progress(&task_id, "executing automation task")
        .await
    {
        warn!(%task_id, "could not record progress: {e}");
    }

    let outcome = AssertUnwindSafe(agent.run(&task_id, &config))
        .catch_unwind()
        .await;

    match outcome {
        Ok(Ok(run)) => {
            if let Err(e) = store
                .set_progress(&task_id, "saving results and screenshots")
                .await
            {
                warn!(%task_id, "could not record progress: {e}");
            }
            match persist_run(&artifacts, &task_id, &config, run) {
                Ok(result) => {
                    info!(
                        %task_id,
                        steps = result.execution_steps.len(),
                        screenshots = result.screenshots.len(),
                        "task completed"
                    );
                    if let Err(e) = store.complete(&task_id, result).await {
                        error!(%task_id, "failed to record completion: {e}");
                    }
                }
                Err(e) => {
                    error!(%task_id, "failed to persist artifacts: {e:#}");
                    let _ = store
                        .fail(&task_id, &format!("failed to save results: {e:#}"))
                        .await;
                }
            }
        }
        Ok(Err(e)) => {
            warn!(%task_id, "agent run failed: {e:#}");
            if let Err(se) = store.fail(&task_id, &format!("{e:#}")).await {
                error!(%task_id, "failed to record failure: {se}");
            }
        }
        Err(_) => {
            error!(%task_id, "agent run panicked");
            let _ = store
                .fail(&task_id, "internal error: agent run panicked")
                .await;
        }
    }
}

/// Write a finished run's artifacts to disk and assemble the result record.
/// Also used by the CLI's local run mode, which has no task store.
pub fn persist_run(
    artifacts: &ArtifactStore,
    task_id: &str,
    config: &TestConfig,
    run: AgentRun,
) -> Result<ExecutionResult> {
    let AgentRun {
        steps,
        conversation,
        summary: _,
    } = run;

    let mut execution_steps = Vec::with_capacity(steps.len());
    let mut screenshots = Vec::new();
    let mut log_lines = Vec::with_capacity(steps.len());

    for (idx, step) in steps.into_iter().enumerate() {
        let mut url = None;
        if let Some(shot) = step.screenshot {
            let saved = artifacts.save_screenshot(&shot.filename, &shot.png)?;
            screenshots.push(saved.url.clone());
            url = Some(saved.url);
        }
        log_lines.push(format!(
            "[{}] step {}: {} -> {}",
            step.timestamp.to_rfc3339(),
            idx + 1,
            step.action,
            step.result
        ));
        execution_steps.push(ExecutionStep {
            step_number: idx + 1,
            action: step.action,
            result: step.result,
            timestamp: step.timestamp,
            screenshot: url,
        });
    }

    artifacts.write_thoughts(task_id, &conversation)?;
    let log_file = artifacts.write_detailed_log(task_id, &log_lines)?;

    let result = ExecutionResult {
        task_id: task_id.to_string(),
        success: true,
        timestamp: Utc::now(),
        task_details: config.clone(),
        execution_steps,
        screenshots,
        conversation,
        error: None,
        log_file: Some(log_file.display().to_string()),
    };

    if let Err(e) = artifacts.write_result(&result) {
        warn!(%task_id, "could not write result file: {e:#}");
    }
    Ok(result)
}

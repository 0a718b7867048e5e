//! Poll a submitted task to its terminal state.
//!
//! The poller submits the config, then checks status on a fixed interval
//! until the task completes or fails. Watches are cancellable at any await
//! point: dropping the [`WatchHandle`] (or starting a new watch on the same
//! poller) tears the loop down without leaving a timer running. Transport
//! errors during polling are retried up to a cap; API errors are not.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{ClientError, TestClient};
use crate::config::PollConfig;
use crate::task::{ExecutionResult, TaskState, TaskStatus, TestConfig};

/// Progress report from a watch, in the order delivered over the channel.
#[derive(Debug)]
pub enum PollEvent {
    /// The server accepted the task.
    Submitted { task_id: String },
    /// A non-terminal status snapshot.
    Status(TaskStatus),
    /// The task completed and its result was fetched.
    Completed(Box<ExecutionResult>),
    /// The watch is over without a result: the task failed, the submission
    /// was rejected, or the server stopped answering.
    Failed { error: String },
}

pub struct StatusPoller {
    client: Arc<TestClient>,
    cfg: PollConfig,
    current: Mutex<Option<CancellationToken>>,
}

impl StatusPoller {
    pub fn new(client: TestClient, cfg: PollConfig) -> Self {
        Self {
            client: Arc::new(client),
            cfg,
            current: Mutex::new(None),
        }
    }

    /// Submit `config` and poll it to a terminal state. At most one watch per
    /// poller is live: starting a new one cancels the previous watch first.
    pub fn watch(&self, config: TestConfig) -> WatchHandle {
        let cancel = CancellationToken::new();
        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(previous) = current.replace(cancel.clone()) {
                previous.cancel();
            }
        }

        let (tx, events) = mpsc::channel(16);
        tokio::spawn(poll_loop(
            self.client.clone(),
            self.cfg.clone(),
            config,
            tx,
            cancel.clone(),
        ));
        WatchHandle { events, cancel }
    }
}

/// Live watch. The loop stops as soon as this is cancelled or dropped.
pub struct WatchHandle {
    events: mpsc::Receiver<PollEvent>,
    cancel: CancellationToken,
}

impl WatchHandle {
    /// Next event, or `None` once the watch has ended.
    pub async fn next_event(&mut self) -> Option<PollEvent> {
        self.events.recv().await
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn poll_loop(
    client: Arc<TestClient>,
    cfg: PollConfig,
    config: TestConfig,
    tx: mpsc::Sender<PollEvent>,
    cancel: CancellationToken,
) {
    let task_id = tokio::select! {
        _ = cancel.cancelled() => return,
        submitted = client.submit(&config) => match submitted {
            Ok(task_id) => task_id,
            Err(e) => {
                let _ = tx.send(PollEvent::Failed { error: format!("submission failed: {e}") }).await;
                return;
            }
        },
    };
    let _ = tx
        .send(PollEvent::Submitted {
            task_id: task_id.clone(),
        })
        .await;

    let mut interval = tokio::time::interval(Duration::from_secs(cfg.interval_secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately, so the first status check does not wait
    // out a full interval.
    let mut transport_failures: u32 = 0;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = interval.tick() => {}
        }

        let polled = tokio::select! {
            _ = cancel.cancelled() => return,
            polled = client.status(&task_id) => polled,
        };

        match polled {
            Ok(status) => {
                transport_failures = 0;
                match status.status {
                    TaskState::Completed => {
                        let fetched = tokio::select! {
                            _ = cancel.cancelled() => return,
                            fetched = client.result(&task_id) => fetched,
                        };
                        let event = match fetched {
                            Ok(result) => PollEvent::Completed(Box::new(result)),
                            Err(e) => PollEvent::Failed {
                                error: format!("fetching result: {e}"),
                            },
                        };
                        let _ = tx.send(event).await;
                        return;
                    }
                    TaskState::Failed => {
                        let error = status
                            .error
                            .unwrap_or_else(|| "task failed without an error message".to_string());
                        let _ = tx.send(PollEvent::Failed { error }).await;
                        return;
                    }
                    TaskState::Queued | TaskState::Running => {
                        let _ = tx.send(PollEvent::Status(status)).await;
                    }
                }
            }
            Err(ClientError::Transport(e)) => {
                transport_failures += 1;
                warn!(
                    %task_id,
                    failures = transport_failures,
                    error = %e,
                    "status poll failed, will retry"
                );
                if transport_failures >= cfg.max_transport_failures.max(1) {
                    let _ = tx
                        .send(PollEvent::Failed {
                            error: format!(
                                "gave up after {transport_failures} consecutive transport failures: {e}"
                            ),
                        })
                        .await;
                    return;
                }
            }
            // 404 here means the record was evicted or never existed; either
            // way the watch cannot recover.
            Err(e) => {
                let _ = tx
                    .send(PollEvent::Failed {
                        error: e.to_string(),
                    })
                    .await;
                return;
            }
        }
    }
}

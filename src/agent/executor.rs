//! Per-assignment execution: the attempt loop and its failure boundary.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::agent::plugins::{Plugin, PluginRegistry};
use crate::domain::errors::DomainError;
use crate::domain::models::{StreamRequest, TaskStatus, WorkAssignment};
use crate::services::config::WorkerConfig;

/// Any non-normal exit of a plugin invocation, reduced to an ordinary value.
#[derive(Debug, Error)]
pub enum PluginFailure {
    #[error("{0}")]
    Failed(String),
    #[error("Task panicked: {0}")]
    Panicked(String),
    #[error("execution timed out after {0}s")]
    TimedOut(u64),
}

/// Sends status updates on the stream with bounded, linearly backed-off
/// retries.
#[derive(Clone)]
pub struct StatusSender {
    outbound: mpsc::Sender<StreamRequest>,
    retries: u32,
    backoff_step: Duration,
}

impl StatusSender {
    pub fn new(outbound: mpsc::Sender<StreamRequest>, config: &WorkerConfig) -> Self {
        Self {
            outbound,
            retries: config.status_send_retries.max(1),
            backoff_step: Duration::from_millis(config.status_send_backoff_ms),
        }
    }

    /// Try to deliver one status update. After the retry budget the task is
    /// left to the reconciler: its store status is whatever was last
    /// persisted, and the sweep will return it to the queue.
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        task_id: i64,
        status: TaskStatus,
        message: String,
    ) -> Result<(), DomainError> {
        for attempt in 1..=self.retries {
            let frame = StreamRequest::UpdateTaskStatus {
                id: task_id,
                status,
                message: message.clone(),
            };
            if self.outbound.send(frame).await.is_ok() {
                return Ok(());
            }
            if attempt < self.retries {
                let backoff = self.backoff_step * attempt;
                tokio::select! {
                    _ = cancel.cancelled() => return Err(DomainError::StreamClosed),
                    _ = sleep(backoff) => {}
                }
            }
        }
        error!(
            task_id,
            status = %status,
            "Failed to send status update after {} retries",
            self.retries
        );
        Err(DomainError::StreamClosed)
    }
}

/// Execute one assignment to a terminal report.
///
/// Each attempt announces RUNNING, resolves the handler, and runs it inside
/// the failure boundary. Intermediate FAILED reports are intentional: they
/// put every failing attempt on the audit log, and FAILED is terminal for
/// the reconciler, so the attempt counter cannot be re-entered from outside.
pub async fn run_assignment(
    assignment: WorkAssignment,
    registry: Arc<PluginRegistry>,
    status: StatusSender,
    config: WorkerConfig,
    cancel: CancellationToken,
) {
    let task = assignment.task;
    let max_attempts = config.max_attempts;
    info!(task_id = task.id, task_type = %task.task_type, "Assignment received");

    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return;
        }

        let _ = status
            .send(
                &cancel,
                task.id,
                TaskStatus::Running,
                format!("Running attempt {} of {}", attempt, max_attempts),
            )
            .await;

        let plugin = match registry.resolve(&task.task_type) {
            Ok(plugin) => plugin,
            Err(err) => {
                // Not retried: the type will not become known by waiting.
                let _ = status
                    .send(
                        &cancel,
                        task.id,
                        TaskStatus::Failed,
                        format!("Failed to create plugin: {}", err),
                    )
                    .await;
                return;
            }
        };

        match invoke_plugin(plugin, task.payload.clone(), config.execution_deadline()).await {
            Ok(()) => {
                let _ = status
                    .send(
                        &cancel,
                        task.id,
                        TaskStatus::Succeeded,
                        format!("Task completed successfully on attempt {}", attempt),
                    )
                    .await;
                info!(task_id = task.id, attempt, "Assignment completed");
                return;
            }
            Err(failure) if attempt == max_attempts => {
                let _ = status
                    .send(
                        &cancel,
                        task.id,
                        TaskStatus::Failed,
                        format!(
                            "All {} attempts failed. Last error: {}",
                            max_attempts, failure
                        ),
                    )
                    .await;
                warn!(task_id = task.id, "Assignment exhausted its attempts");
                return;
            }
            Err(failure) => {
                let _ = status
                    .send(
                        &cancel,
                        task.id,
                        TaskStatus::Failed,
                        format!("Attempt {} failed: {}", attempt, failure),
                    )
                    .await;

                let backoff = Duration::from_millis(config.attempt_backoff_ms)
                    * 2u32.saturating_pow(attempt - 1);
                debug!(task_id = task.id, attempt, ?backoff, "Backing off before retry");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = sleep(backoff) => {}
                }
            }
        }
    }
}

/// Failure-capturing scope around `plugin.execute`: error returns, panics,
/// and deadline overruns all come back as `PluginFailure` values.
async fn invoke_plugin(
    plugin: Arc<dyn Plugin>,
    params: BTreeMap<String, String>,
    deadline: Duration,
) -> Result<(), PluginFailure> {
    let mut handle = tokio::spawn(async move { plugin.execute(&params).await });

    match timeout(deadline, &mut handle).await {
        Err(_) => {
            handle.abort();
            Err(PluginFailure::TimedOut(deadline.as_secs()))
        }
        Ok(Ok(Ok(()))) => Ok(()),
        Ok(Ok(Err(err))) => Err(PluginFailure::Failed(err.to_string())),
        Ok(Err(join_err)) => {
            if join_err.is_panic() {
                Err(PluginFailure::Panicked(panic_message(join_err.into_panic())))
            } else {
                Err(PluginFailure::Failed("execution was aborted".to_string()))
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

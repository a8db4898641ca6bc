//! Periodic sweep that returns stranded tasks to the queue.
//!
//! The dispatch queue is in-memory; the store is durable. Each tick makes the
//! queue an eventually-correct reflection of the store's QUEUED set and
//! breaks out tasks an agent accepted but never terminated.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskStatus;
use crate::services::config::ReconcileConfig;
use crate::services::metrics::incr;
use crate::services::task_server::TaskServer;

/// Details recorded when a stranded task is returned to the queue.
pub const REQUEUED_DETAILS: &str = "Task has been queued again";

pub struct Reconciler {
    server: Arc<TaskServer>,
    config: ReconcileConfig,
}

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// RUNNING tasks transitioned back to QUEUED (with history).
    pub requeued: usize,
    /// QUEUED tasks re-fed into the in-memory queue (no status change, no
    /// history).
    pub refreshed: usize,
}

impl Reconciler {
    pub fn new(server: Arc<TaskServer>, config: ReconcileConfig) -> Self {
        Self { server, config }
    }

    /// Run sweeps at the configured cadence until cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Reconciler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.run_once().await {
                        Ok(report) if report.requeued > 0 || report.refreshed > 0 => {
                            info!(
                                requeued = report.requeued,
                                refreshed = report.refreshed,
                                "Reconcile sweep complete"
                            );
                        }
                        Ok(_) => {}
                        Err(err) => warn!("Reconcile sweep failed: {}", err),
                    }
                }
            }
        }
    }

    /// One sweep: the RUNNING pass reclaims tasks whose agent vanished
    /// mid-execution; the QUEUED pass re-feeds tasks whose in-memory queue
    /// entry was lost. Re-feeding never touches status or history, so an
    /// already-queued task sees no spurious writes.
    pub async fn run_once(&self) -> DomainResult<ReconcileReport> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.deadline())
                .unwrap_or_else(|_| chrono::Duration::zero());
        let mut report = ReconcileReport::default();

        let stalled_running = self
            .server
            .task_store()
            .get_stalled_tasks(TaskStatus::Running, cutoff)
            .await?;
        for task in stalled_running {
            match self
                .server
                .update_task_status(task.id, TaskStatus::Queued, REQUEUED_DETAILS)
                .await
            {
                Ok(()) => {
                    incr(&self.server.metrics().tasks_requeued);
                    report.requeued += 1;
                }
                Err(err) => {
                    warn!(task_id = task.id, "Failed to requeue stalled task: {}", err);
                }
            }
        }

        let stalled_queued = self
            .server
            .task_store()
            .get_stalled_tasks(TaskStatus::Queued, cutoff)
            .await?;
        for task in stalled_queued {
            self.server.queue().enqueue(task);
            report.refreshed += 1;
        }

        Ok(report)
    }
}

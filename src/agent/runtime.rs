//! The agent-side execution loop.
//!
//! One runtime per agent process. Over a connected stream it runs a receive
//! fiber, a heartbeat fiber, and one fiber per in-flight assignment bounded
//! by a semaphore.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::executor::{run_assignment, StatusSender};
use crate::agent::plugins::PluginRegistry;
use crate::domain::models::{AgentStream, StreamRequest, StreamResponse, WorkAssignment};
use crate::services::config::WorkerConfig;

/// Local buffer of assignments awaiting an execution slot.
const WORK_BUFFER: usize = 100;

pub struct AgentRuntime {
    registry: Arc<PluginRegistry>,
    config: WorkerConfig,
}

impl AgentRuntime {
    pub fn new(registry: Arc<PluginRegistry>, config: WorkerConfig) -> Self {
        Self { registry, config }
    }

    /// Consume one stream until the server closes it or `cancel` fires.
    /// In-flight assignments are cancelled when the stream ends; the server's
    /// reconciler re-queues anything that never reached a terminal status.
    pub async fn run(&self, stream: AgentStream, cancel: CancellationToken) {
        let session_cancel = cancel.child_token();
        let AgentStream {
            outbound,
            mut inbound,
        } = stream;

        info!("Agent stream connected");

        let heartbeat = {
            let outbound = outbound.clone();
            let cancel = session_cancel.clone();
            let period = Duration::from_secs(self.config.heartbeat_interval_secs.max(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {
                            let beat = StreamRequest::Heartbeat { timestamp: Utc::now() };
                            if outbound.send(beat).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            })
        };

        let (work_tx, work_rx) = mpsc::channel::<WorkAssignment>(WORK_BUFFER);

        let dispatcher = {
            let registry = self.registry.clone();
            let config = self.config.clone();
            let status = StatusSender::new(outbound.clone(), &config);
            let cancel = session_cancel.clone();
            tokio::spawn(dispatch_work(work_rx, registry, status, config, cancel))
        };

        loop {
            tokio::select! {
                _ = session_cancel.cancelled() => break,
                frame = inbound.recv() => match frame {
                    None => {
                        info!("Server closed the stream");
                        break;
                    }
                    Some(StreamResponse::Heartbeat { timestamp }) => {
                        debug!(%timestamp, "Server heartbeat");
                    }
                    Some(StreamResponse::WorkAssignment(assignment)) => {
                        match work_tx.try_send(assignment) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(assignment)) => {
                                warn!(
                                    task_id = assignment.task.id,
                                    "Work buffer full, discarding assignment"
                                );
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
        }

        session_cancel.cancel();
        drop(work_tx);
        let _ = heartbeat.await;
        let _ = dispatcher.await;
        info!("Agent stream closed");
    }
}

async fn dispatch_work(
    mut work_rx: mpsc::Receiver<WorkAssignment>,
    registry: Arc<PluginRegistry>,
    status: StatusSender,
    config: WorkerConfig,
    cancel: CancellationToken,
) {
    let slots = Arc::new(Semaphore::new(config.max_in_flight.max(1)));

    loop {
        let assignment = tokio::select! {
            _ = cancel.cancelled() => break,
            assignment = work_rx.recv() => match assignment {
                Some(assignment) => assignment,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let registry = registry.clone();
        let status = status.clone();
        let config = config.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let _permit = permit;
            run_assignment(assignment, registry, status, config, cancel).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::plugins::{Plugin, PluginError};
    use crate::domain::models::{stream_pair, Task, TaskStatus};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::BTreeMap;

    struct Instant;

    #[async_trait]
    impl Plugin for Instant {
        async fn execute(&self, _params: &BTreeMap<String, String>) -> Result<(), PluginError> {
            Ok(())
        }
    }

    fn test_task(id: i64) -> Task {
        Task {
            id,
            name: format!("t{}", id),
            description: String::new(),
            task_type: "instant".to_string(),
            payload: BTreeMap::new(),
            status: TaskStatus::Queued,
            retries: 0,
            priority: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn executes_assignments_and_reports_terminal_status() {
        let mut registry = PluginRegistry::new();
        registry.register("instant", Arc::new(Instant));
        let runtime = AgentRuntime::new(
            Arc::new(registry),
            WorkerConfig {
                attempt_backoff_ms: 1,
                ..Default::default()
            },
        );

        let (mut server, agent) = stream_pair(32);
        let cancel = CancellationToken::new();
        let run = tokio::spawn(async move { runtime.run(agent, cancel).await });

        server
            .outbound
            .send(StreamResponse::WorkAssignment(WorkAssignment::new(
                test_task(1),
            )))
            .await
            .unwrap();

        let mut statuses = Vec::new();
        while statuses.last() != Some(&TaskStatus::Succeeded) {
            match server.inbound.recv().await.unwrap() {
                StreamRequest::UpdateTaskStatus { id, status, .. } => {
                    assert_eq!(id, 1);
                    statuses.push(status);
                }
                StreamRequest::Heartbeat { .. } => {}
            }
        }
        assert_eq!(statuses, vec![TaskStatus::Running, TaskStatus::Succeeded]);

        drop(server);
        run.await.unwrap();
    }

    #[tokio::test]
    async fn heartbeats_flow_while_idle() {
        let runtime = AgentRuntime::new(
            Arc::new(PluginRegistry::new()),
            WorkerConfig {
                heartbeat_interval_secs: 1,
                ..Default::default()
            },
        );

        let (mut server, agent) = stream_pair(8);
        let cancel = CancellationToken::new();
        let run = tokio::spawn(async move { runtime.run(agent, cancel).await });

        // The interval ticks immediately, so the first beat arrives at once.
        assert!(matches!(
            server.inbound.recv().await,
            Some(StreamRequest::Heartbeat { .. })
        ));

        drop(server);
        run.await.unwrap();
    }
}

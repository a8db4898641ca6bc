//! One stream session per connected agent.
//!
//! A [`Session`] owns everything bound to one agent connection: the outbound
//! frame sender, the fan-out dispatcher feeding it, and a child cancellation
//! token that tears both down when the stream ends. Messages flow through
//! channels; the session shares no mutable structure with the fan-out
//! workers.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use tracing::{debug, info, warn};

use crate::domain::models::{ServerStream, StreamRequest, StreamResponse};
use crate::services::config::DispatchConfig;
use crate::services::fanout::spawn_dispatcher;
use crate::services::metrics::incr;
use crate::services::task_server::TaskServer;

/// Handle to a running agent session.
pub struct Session {
    id: Uuid,
    cancel: CancellationToken,
    last_seen: Arc<RwLock<DateTime<Utc>>>,
    handle: JoinHandle<()>,
}

impl Session {
    /// Start a session over the server-side stream halves. The session runs
    /// until the agent half-closes, the server shuts down, or `shutdown` is
    /// called.
    pub fn spawn(server: Arc<TaskServer>, stream: ServerStream, config: DispatchConfig) -> Self {
        let id = Uuid::new_v4();
        let cancel = server.shutdown_token().child_token();
        let last_seen = Arc::new(RwLock::new(Utc::now()));

        let handle = tokio::spawn(run_session(
            id,
            server,
            stream,
            config,
            cancel.clone(),
            last_seen.clone(),
        ));

        Self {
            id,
            cancel,
            last_seen,
            handle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the agent last demonstrated liveness (connect time or latest
    /// heartbeat).
    pub async fn last_seen(&self) -> DateTime<Utc> {
        *self.last_seen.read().await
    }

    /// Wait for the session to end on its own.
    pub async fn join(self) {
        let _ = self.handle.await;
    }

    /// Cancel the session and wait for its fibers to wind down.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.handle.await;
    }
}

async fn run_session(
    id: Uuid,
    server: Arc<TaskServer>,
    stream: ServerStream,
    config: DispatchConfig,
    cancel: CancellationToken,
    last_seen: Arc<RwLock<DateTime<Utc>>>,
) {
    info!(session_id = %id, "Agent session opened");

    let ServerStream {
        mut inbound,
        outbound,
    } = stream;

    let dispatcher = spawn_dispatcher(
        server.queue().clone(),
        outbound.clone(),
        config.clone(),
        server.metrics().clone(),
        cancel.clone(),
    );

    // Feed the store's queued backlog to this session. The in-memory queue
    // may have lost these entries to a restart or overflow.
    let feeder = {
        let server = server.clone();
        tokio::spawn(async move {
            match server
                .task_store()
                .get_stalled_tasks(crate::domain::models::TaskStatus::Queued, Utc::now())
                .await
            {
                Ok(backlog) => {
                    for task in backlog {
                        server.queue().enqueue(task);
                    }
                }
                Err(err) => warn!(session_id = %id, "Failed to load queued backlog: {}", err),
            }
        })
    };

    let heartbeat = (config.heartbeat_interval_secs > 0).then(|| {
        let outbound = outbound.clone();
        let cancel = cancel.clone();
        let period = Duration::from_secs(config.heartbeat_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let frame = StreamResponse::Heartbeat { timestamp: Utc::now() };
                        // A full buffer just means the agent is busy; skip the beat.
                        if matches!(
                            outbound.try_send(frame),
                            Err(tokio::sync::mpsc::error::TrySendError::Closed(_))
                        ) {
                            break;
                        }
                    }
                }
            }
        })
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!(session_id = %id, "Session cancelled");
                break;
            }
            frame = inbound.recv() => match frame {
                None => {
                    info!(session_id = %id, "Agent closed the stream");
                    break;
                }
                Some(StreamRequest::Heartbeat { timestamp }) => {
                    debug!(session_id = %id, %timestamp, "Heartbeat received");
                    incr(&server.metrics().heartbeats_received);
                    *last_seen.write().await = Utc::now();
                }
                Some(StreamRequest::UpdateTaskStatus { id: task_id, status, message }) => {
                    // Persistence failures are logged and counted but never
                    // close the stream; the reconciler is the safety net.
                    if let Err(err) = server
                        .update_task_status(task_id, status, &message)
                        .await
                    {
                        warn!(
                            session_id = %id,
                            task_id,
                            "Failed to apply stream status update: {}",
                            err
                        );
                        incr(&server.metrics().stream_update_errors);
                    }
                }
            }
        }
    }

    cancel.cancel();
    feeder.abort();
    if let Some(heartbeat) = heartbeat {
        let _ = heartbeat.await;
    }
    let _ = dispatcher.await;
    info!(session_id = %id, "Agent session closed");
}

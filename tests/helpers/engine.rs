//! Shared engine harness: a control plane wired to in-process agents over
//! the stream seam, with fast timings for tests.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use taskherd::agent::{AgentRuntime, PluginRegistry};
use taskherd::domain::models::{stream_pair, Task, TaskStatus};
use taskherd::services::config::{DispatchConfig, WorkerConfig};
use taskherd::services::{DispatchQueue, EngineMetrics, Session, TaskServer};

use super::database::setup_test_db;

/// Worker config with millisecond backoffs so retry paths run quickly.
pub fn fast_worker_config() -> WorkerConfig {
    WorkerConfig {
        attempt_backoff_ms: 10,
        status_send_backoff_ms: 10,
        plugin_timeout_secs: 5,
        heartbeat_interval_secs: 1,
        ..Default::default()
    }
}

pub fn fast_dispatch_config() -> DispatchConfig {
    DispatchConfig {
        send_backoff_ms: 10,
        heartbeat_interval_secs: 0,
        ..Default::default()
    }
}

pub async fn setup_server(dispatch: &DispatchConfig) -> Arc<TaskServer> {
    let pool = setup_test_db().await;
    let metrics = Arc::new(EngineMetrics::new());
    Arc::new(TaskServer::new(
        Arc::new(taskherd::adapters::sqlite::SqliteTaskStore::new(pool.clone())),
        Arc::new(taskherd::adapters::sqlite::SqliteHistoryStore::new(pool)),
        DispatchQueue::new(dispatch.queue_capacity, metrics.clone()),
        metrics,
        CancellationToken::new(),
    ))
}

/// A connected in-process agent and its server-side session.
pub struct ConnectedAgent {
    pub session: Session,
    runtime_handle: tokio::task::JoinHandle<()>,
    cancel: CancellationToken,
}

impl ConnectedAgent {
    pub async fn disconnect(self) {
        self.cancel.cancel();
        let _ = self.runtime_handle.await;
        self.session.shutdown().await;
    }
}

/// Open a session and run an agent over it with the given registry. Waits a
/// beat so the session's backlog feeder has finished before the caller
/// creates tasks, keeping deliveries exactly-once for history assertions.
pub async fn connect_agent(
    server: &Arc<TaskServer>,
    registry: PluginRegistry,
    dispatch: DispatchConfig,
    worker: WorkerConfig,
) -> ConnectedAgent {
    let (server_stream, agent_stream) = stream_pair(dispatch.outbound_capacity);
    let session = Session::spawn(server.clone(), server_stream, dispatch);

    let cancel = CancellationToken::new();
    let runtime_cancel = cancel.clone();
    let runtime_handle = tokio::spawn(async move {
        AgentRuntime::new(Arc::new(registry), worker)
            .run(agent_stream, runtime_cancel)
            .await;
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    ConnectedAgent {
        session,
        runtime_handle,
        cancel,
    }
}

/// Poll the store until the task reaches `expected`, panicking after the
/// deadline.
pub async fn wait_for_status(
    server: &Arc<TaskServer>,
    id: i64,
    expected: TaskStatus,
    deadline: Duration,
) -> Task {
    let start = tokio::time::Instant::now();
    loop {
        let task = server.get_task(id).await.expect("task should exist");
        if task.status == expected {
            return task;
        }
        if start.elapsed() > deadline {
            panic!(
                "task {} stuck in {:?}, expected {:?}",
                id, task.status, expected
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

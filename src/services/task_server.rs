//! Control-plane façade over the stores and the dispatch queue.
//!
//! Every public operation of the service routes through here, whether it
//! arrives over the unary RPC surface, the agent stream, or the CLI. Status
//! updates from all sources share one code path so the history invariant
//! holds regardless of transport.

use std::collections::HashMap;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{NewTask, NewTaskHistory, Task, TaskHistory, TaskStatus};
use crate::domain::ports::{HistoryStore, TaskFilter, TaskStore};
use crate::services::dispatch_queue::DispatchQueue;
use crate::services::metrics::{incr, EngineMetrics};
use crate::services::retry::RetryPolicy;

/// Details recorded with the initial QUEUED transition.
pub const SCHEDULED_DETAILS: &str = "Task is scheduled";

pub struct TaskServer {
    task_store: Arc<dyn TaskStore>,
    history_store: Arc<dyn HistoryStore>,
    queue: DispatchQueue,
    metrics: Arc<EngineMetrics>,
    history_retry: RetryPolicy,
    shutdown: CancellationToken,
}

impl TaskServer {
    pub fn new(
        task_store: Arc<dyn TaskStore>,
        history_store: Arc<dyn HistoryStore>,
        queue: DispatchQueue,
        metrics: Arc<EngineMetrics>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            task_store,
            history_store,
            queue,
            metrics,
            history_retry: RetryPolicy::standard(),
            shutdown,
        }
    }

    /// Create a task: persist it QUEUED, append the scheduling history entry,
    /// and hand it to the dispatch queue. The history append is best-effort;
    /// the task row is the source of truth and the reconciler covers a lost
    /// enqueue.
    #[instrument(skip(self, task), fields(name = %task.name, task_type = %task.task_type), err)]
    pub async fn create_task(&self, task: NewTask) -> DomainResult<i64> {
        task.validate()?;

        let created = self.task_store.create_task(task).await?;
        incr(&self.metrics.tasks_created);

        self.append_history(created.id, TaskStatus::Queued, SCHEDULED_DETAILS)
            .await;

        self.queue.enqueue(created.clone());

        info!(task_id = created.id, "Task created");
        Ok(created.id)
    }

    #[instrument(skip(self), err)]
    pub async fn get_task(&self, id: i64) -> DomainResult<Task> {
        self.task_store
            .get_task_by_id(id)
            .await?
            .ok_or(DomainError::TaskNotFound(id))
    }

    /// List tasks. A non-positive limit falls back to 100, a negative offset
    /// to 0; `StatusFilter::All` and an empty type disable the predicates.
    #[instrument(skip(self), err)]
    pub async fn list_tasks(&self, mut filter: TaskFilter) -> DomainResult<Vec<Task>> {
        if filter.limit <= 0 {
            filter.limit = 100;
        }
        if filter.offset < 0 {
            filter.offset = 0;
        }
        self.task_store.list_tasks(&filter).await
    }

    #[instrument(skip(self), err)]
    pub async fn get_task_history(&self, id: i64) -> DomainResult<Vec<TaskHistory>> {
        self.history_store.list_task_histories(id).await
    }

    /// Record a status transition. The server does not second-guess the
    /// reported status: in a distributed setting it cannot tell "wrong" from
    /// "stale", so it writes what it was told and leaves rescue to the
    /// reconciler. A transition back to QUEUED re-enters the dispatch queue.
    #[instrument(skip(self, message), err)]
    pub async fn update_task_status(
        &self,
        id: i64,
        status: TaskStatus,
        message: &str,
    ) -> DomainResult<()> {
        self.task_store.update_task_status(id, status).await?;
        incr(&self.metrics.status_updates);

        self.append_history(id, status, message).await;

        if status == TaskStatus::Queued {
            match self.task_store.get_task_by_id(id).await? {
                Some(task) => self.queue.enqueue(task),
                None => warn!(task_id = id, "Task vanished between update and re-enqueue"),
            }
        }

        info!(task_id = id, status = %status, "Task status updated");
        Ok(())
    }

    #[instrument(skip(self), err)]
    pub async fn get_status_counts(&self) -> DomainResult<HashMap<TaskStatus, i64>> {
        self.task_store.get_task_status_counts().await
    }

    /// Liveness ping for out-of-band clients; echoes the server time.
    pub fn heartbeat(&self) -> chrono::DateTime<chrono::Utc> {
        incr(&self.metrics.heartbeats_received);
        chrono::Utc::now()
    }

    /// Append a history entry with bounded retry. Failures are logged and
    /// counted, never surfaced: history is for audit, the task row drives
    /// dispatch.
    async fn append_history(&self, task_id: i64, status: TaskStatus, details: &str) {
        let result = self
            .history_retry
            .run(&self.shutdown, || {
                self.history_store
                    .create_task_history(NewTaskHistory::new(task_id, status, details))
            })
            .await;

        if let Err(err) = result {
            warn!(
                task_id,
                status = %status,
                "Failed to record task history after retries: {}",
                err
            );
            incr(&self.metrics.history_write_failures);
        }
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    pub fn task_store(&self) -> &Arc<dyn TaskStore> {
        &self.task_store
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        all_embedded_migrations, create_test_pool, Migrator, SqliteHistoryStore, SqliteTaskStore,
    };
    use crate::domain::models::StatusFilter;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// History store that can be switched into a failing mode.
    struct FlakyHistoryStore {
        inner: SqliteHistoryStore,
        failing: AtomicBool,
    }

    #[async_trait]
    impl HistoryStore for FlakyHistoryStore {
        async fn create_task_history(&self, entry: NewTaskHistory) -> DomainResult<TaskHistory> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(DomainError::DatabaseError("history unavailable".into()));
            }
            self.inner.create_task_history(entry).await
        }

        async fn list_task_histories(&self, task_id: i64) -> DomainResult<Vec<TaskHistory>> {
            self.inner.list_task_histories(task_id).await
        }
    }

    async fn setup() -> (TaskServer, Arc<FlakyHistoryStore>) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();

        let history = Arc::new(FlakyHistoryStore {
            inner: SqliteHistoryStore::new(pool.clone()),
            failing: AtomicBool::new(false),
        });
        let metrics = Arc::new(EngineMetrics::new());
        let server = TaskServer::new(
            Arc::new(SqliteTaskStore::new(pool)),
            history.clone(),
            DispatchQueue::new(16, metrics.clone()),
            metrics,
            CancellationToken::new(),
        );
        (server, history)
    }

    #[tokio::test]
    async fn create_persists_history_and_enqueues() {
        let (server, _) = setup().await;

        let id = server
            .create_task(NewTask::new("t1", "send_email").with_param("k", "v"))
            .await
            .unwrap();

        let task = server.get_task(id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Queued);

        let history = server.get_task_history(id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, TaskStatus::Queued);
        assert_eq!(history[0].details, SCHEDULED_DETAILS);

        let queued = server.queue().recv().await.unwrap();
        assert_eq!(queued.id, id);
    }

    #[tokio::test]
    async fn create_rejects_invalid_requests() {
        let (server, _) = setup().await;
        let err = server.create_task(NewTask::new("", "send_email")).await;
        assert!(matches!(err, Err(DomainError::ValidationFailed(_))));
    }

    #[tokio::test]
    async fn create_survives_history_outage() {
        let (server, history) = setup().await;
        history.failing.store(true, Ordering::SeqCst);

        let id = server
            .create_task(NewTask::new("t1", "send_email"))
            .await
            .unwrap();

        assert_eq!(server.get_task(id).await.unwrap().status, TaskStatus::Queued);
        assert!(server.metrics().snapshot().history_write_failures > 0);
        assert!(server.get_task_history(id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_to_queued_reenters_the_queue() {
        let (server, _) = setup().await;
        let id = server
            .create_task(NewTask::new("t1", "run_query"))
            .await
            .unwrap();
        server.queue().recv().await.unwrap();

        server
            .update_task_status(id, TaskStatus::Running, "Running attempt 1 of 3")
            .await
            .unwrap();
        server
            .update_task_status(id, TaskStatus::Queued, "Task has been queued again")
            .await
            .unwrap();

        let requeued = server.queue().recv().await.unwrap();
        assert_eq!(requeued.id, id);

        let history = server.get_task_history(id).await.unwrap();
        let statuses: Vec<_> = history.iter().map(|h| h.status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Queued, TaskStatus::Running, TaskStatus::Queued]
        );
    }

    #[tokio::test]
    async fn duplicate_updates_keep_one_status_two_entries() {
        let (server, _) = setup().await;
        let id = server
            .create_task(NewTask::new("t1", "run_query"))
            .await
            .unwrap();

        for _ in 0..2 {
            server
                .update_task_status(id, TaskStatus::Running, "Running attempt 1 of 3")
                .await
                .unwrap();
        }

        assert_eq!(server.get_task(id).await.unwrap().status, TaskStatus::Running);
        let running_entries = server
            .get_task_history(id)
            .await
            .unwrap()
            .into_iter()
            .filter(|h| h.status == TaskStatus::Running)
            .count();
        assert_eq!(running_entries, 2);
    }

    #[tokio::test]
    async fn update_unknown_task_is_not_found() {
        let (server, _) = setup().await;
        let err = server
            .update_task_status(404, TaskStatus::Running, "Running attempt 1 of 3")
            .await;
        assert!(matches!(err, Err(DomainError::TaskNotFound(404))));
    }

    #[tokio::test]
    async fn list_applies_default_pagination() {
        let (server, _) = setup().await;
        for i in 0..3 {
            server
                .create_task(NewTask::new(format!("t{}", i), "send_email"))
                .await
                .unwrap();
        }

        let tasks = server
            .list_tasks(TaskFilter {
                limit: 0,
                offset: -5,
                status: StatusFilter::All,
                task_type: None,
            })
            .await
            .unwrap();
        assert_eq!(tasks.len(), 3);
    }
}

//! Persistence port for tasks.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::errors::DomainResult;
use crate::domain::models::{NewTask, StatusFilter, Task, TaskStatus};

/// Durable CRUD contract for tasks.
///
/// The engine depends on this port, not on a concrete database, so the
/// storage backend can be swapped and tests can run against an in-memory
/// database. Implementations must be `Send + Sync`; concurrency safety is
/// delegated to the backing store.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Persist a new task in QUEUED state and return it with its assigned id.
    async fn create_task(&self, task: NewTask) -> DomainResult<Task>;

    /// Fetch a task by id, or `None` if it does not exist.
    async fn get_task_by_id(&self, id: i64) -> DomainResult<Option<Task>>;

    /// Set a task's status, atomically bumping `updated_at`.
    ///
    /// Returns `DomainError::TaskNotFound` when no row matches.
    async fn update_task_status(&self, id: i64, status: TaskStatus) -> DomainResult<()>;

    /// List tasks matching the filter, ordered by id.
    async fn list_tasks(&self, filter: &TaskFilter) -> DomainResult<Vec<Task>>;

    /// Count tasks per status across the whole table.
    async fn get_task_status_counts(&self) -> DomainResult<HashMap<TaskStatus, i64>>;

    /// Tasks in `status` whose `updated_at` is strictly older than the cutoff.
    /// This is the reconciler's view of stranded work.
    async fn get_stalled_tasks(
        &self,
        status: TaskStatus,
        older_than: DateTime<Utc>,
    ) -> DomainResult<Vec<Task>>;
}

/// Filter criteria for task list queries. A `StatusFilter::All` status and an
/// empty type disable the respective predicates.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFilter {
    pub limit: i64,
    pub offset: i64,
    pub status: StatusFilter,
    pub task_type: Option<String>,
}

impl Default for TaskFilter {
    fn default() -> Self {
        Self {
            limit: 100,
            offset: 0,
            status: StatusFilter::All,
            task_type: None,
        }
    }
}

//! Persistence port for the append-only transition log.

use async_trait::async_trait;

use crate::domain::errors::DomainResult;
use crate::domain::models::{NewTaskHistory, TaskHistory};

/// Append-only store of status transitions per task.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a transition record and return it with its assigned id.
    async fn create_task_history(&self, entry: NewTaskHistory) -> DomainResult<TaskHistory>;

    /// All transitions for a task, ascending by id.
    async fn list_task_histories(&self, task_id: i64) -> DomainResult<Vec<TaskHistory>>;
}

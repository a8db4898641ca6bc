//! SQLite implementation of the HistoryStore.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{NewTaskHistory, TaskHistory, TaskStatus};
use crate::domain::ports::HistoryStore;

#[derive(Clone)]
pub struct SqliteHistoryStore {
    pool: SqlitePool,
}

impl SqliteHistoryStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn create_task_history(&self, entry: NewTaskHistory) -> DomainResult<TaskHistory> {
        let now = Utc::now();

        let result = sqlx::query(
            "INSERT INTO task_histories (task_id, status, details, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(entry.task_id)
        .bind(entry.status.as_str())
        .bind(&entry.details)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(TaskHistory {
            id: result.last_insert_rowid(),
            task_id: entry.task_id,
            status: entry.status,
            details: entry.details,
            created_at: now,
        })
    }

    async fn list_task_histories(&self, task_id: i64) -> DomainResult<Vec<TaskHistory>> {
        let rows: Vec<HistoryRow> =
            sqlx::query_as("SELECT * FROM task_histories WHERE task_id = ? ORDER BY id")
                .bind(task_id)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter().map(TaskHistory::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    task_id: i64,
    status: String,
    details: String,
    created_at: String,
}

impl TryFrom<HistoryRow> for TaskHistory {
    type Error = DomainError;

    fn try_from(row: HistoryRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::InvalidStatus(format!("stored status: {}", row.status)))?;

        let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&row.created_at)
            .map(|d| d.with_timezone(&Utc))
            .map_err(|e| DomainError::SerializationError(e.to_string()))?;

        Ok(TaskHistory {
            id: row.id,
            task_id: row.task_id,
            status,
            details: row.details,
            created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator};
    use crate::domain::models::NewTask;
    use crate::domain::ports::TaskStore;

    async fn setup() -> (crate::adapters::sqlite::SqliteTaskStore, SqliteHistoryStore) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        (
            crate::adapters::sqlite::SqliteTaskStore::new(pool.clone()),
            SqliteHistoryStore::new(pool),
        )
    }

    #[tokio::test]
    async fn entries_list_in_append_order() {
        let (tasks, history) = setup().await;
        let task = tasks
            .create_task(NewTask::new("t1", "send_email"))
            .await
            .unwrap();

        for (status, details) in [
            (TaskStatus::Queued, "Task is scheduled"),
            (TaskStatus::Running, "Running attempt 1 of 3"),
            (TaskStatus::Succeeded, "Task completed successfully on attempt 1"),
        ] {
            history
                .create_task_history(NewTaskHistory::new(task.id, status, details))
                .await
                .unwrap();
        }

        let entries = history.list_task_histories(task.id).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(entries[0].status, TaskStatus::Queued);
        assert_eq!(entries[0].details, "Task is scheduled");
        assert_eq!(entries[2].status, TaskStatus::Succeeded);
    }

    #[tokio::test]
    async fn duplicate_transitions_append_twice() {
        let (tasks, history) = setup().await;
        let task = tasks
            .create_task(NewTask::new("t1", "send_email"))
            .await
            .unwrap();

        let entry = NewTaskHistory::new(task.id, TaskStatus::Running, "Running attempt 1 of 3");
        history.create_task_history(entry.clone()).await.unwrap();
        history.create_task_history(entry).await.unwrap();

        let entries = history.list_task_histories(task.id).await.unwrap();
        assert_eq!(entries.len(), 2);
    }

    #[tokio::test]
    async fn unknown_task_has_empty_history() {
        let (_, history) = setup().await;
        let entries = history.list_task_histories(42).await.unwrap();
        assert!(entries.is_empty());
    }
}

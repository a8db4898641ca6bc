//! SQLite implementation of the TaskStore.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{payload_from_json, payload_to_json, NewTask, StatusFilter, Task, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskStore};

#[derive(Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create_task(&self, task: NewTask) -> DomainResult<Task> {
        let payload_json = payload_to_json(&task.payload)?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"INSERT INTO tasks (name, description, task_type, payload, status,
               retries, priority, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, 0, 0, ?, ?)"#,
        )
        .bind(&task.name)
        .bind(&task.description)
        .bind(&task.task_type)
        .bind(&payload_json)
        .bind(TaskStatus::Queued.as_str())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();

        Ok(Task {
            id,
            name: task.name,
            description: task.description,
            task_type: task.task_type,
            payload: task.payload,
            status: TaskStatus::Queued,
            retries: 0,
            priority: 0,
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_task_by_id(&self, id: i64) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Task::try_from).transpose()
    }

    async fn update_task_status(&self, id: i64, status: TaskStatus) -> DomainResult<()> {
        let result = sqlx::query("UPDATE tasks SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DomainError::TaskNotFound(id));
        }

        Ok(())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> DomainResult<Vec<Task>> {
        let mut query = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let StatusFilter::Only(status) = filter.status {
            query.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(task_type) = filter.task_type.as_deref() {
            if !task_type.is_empty() {
                query.push_str(" AND task_type = ?");
                bindings.push(task_type.to_string());
            }
        }

        query.push_str(" ORDER BY id LIMIT ? OFFSET ?");

        let mut q = sqlx::query_as::<_, TaskRow>(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }
        q = q.bind(filter.limit).bind(filter.offset);

        let rows: Vec<TaskRow> = q.fetch_all(&self.pool).await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn get_task_status_counts(&self) -> DomainResult<HashMap<TaskStatus, i64>> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let mut counts = HashMap::new();
        for (status_str, count) in rows {
            if let Some(status) = TaskStatus::from_str(&status_str) {
                counts.insert(status, count);
            }
        }
        Ok(counts)
    }

    async fn get_stalled_tasks(
        &self,
        status: TaskStatus,
        older_than: DateTime<Utc>,
    ) -> DomainResult<Vec<Task>> {
        let rows: Vec<TaskRow> = sqlx::query_as(
            "SELECT * FROM tasks WHERE status = ? AND updated_at < ? ORDER BY id",
        )
        .bind(status.as_str())
        .bind(older_than.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Task::try_from).collect()
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: i64,
    name: String,
    description: String,
    task_type: String,
    payload: String,
    status: String,
    retries: i64,
    priority: i64,
    created_at: String,
    updated_at: String,
}

impl TryFrom<TaskRow> for Task {
    type Error = DomainError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let status = TaskStatus::from_str(&row.status)
            .ok_or_else(|| DomainError::InvalidStatus(format!("stored status: {}", row.status)))?;

        let payload = payload_from_json(&row.payload)?;

        let created_at = parse_timestamp(&row.created_at)?;
        let updated_at = parse_timestamp(&row.updated_at)?;

        Ok(Task {
            id: row.id,
            name: row.name,
            description: row.description,
            task_type: row.task_type,
            payload,
            status,
            retries: row.retries as u32,
            priority: row.priority as u32,
            created_at,
            updated_at,
        })
    }
}

fn parse_timestamp(raw: &str) -> DomainResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| DomainError::SerializationError(e.to_string()))
}

//! Append-only audit log of task status transitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::TaskStatus;

/// A single recorded status transition. History rows are never updated or
/// deleted; when the task row and the history diverge after a partial
/// failure, history is the truth for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskHistory {
    pub id: i64,
    pub task_id: i64,
    /// The status set by this transition
    pub status: TaskStatus,
    /// Free-text reason or message attached to the transition
    pub details: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied to append a history entry; the store assigns id and
/// timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTaskHistory {
    pub task_id: i64,
    pub status: TaskStatus,
    pub details: String,
}

impl NewTaskHistory {
    pub fn new(task_id: i64, status: TaskStatus, details: impl Into<String>) -> Self {
        Self {
            task_id,
            status,
            details: details.into(),
        }
    }
}

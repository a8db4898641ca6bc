//! Task domain model.
//!
//! Tasks are durable units of work dispatched to agents over a stream.
//! Their status advances monotonically except when the reconciler returns
//! a stranded task to the queue.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::errors::{DomainError, DomainResult};

/// Status of a task in the dispatch pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Status could not be determined (wire default, never written by the engine)
    Unknown,
    /// Task is waiting to be dispatched to an agent
    Queued,
    /// An agent has announced it is executing the task
    Running,
    /// Execution failed; terminal unless the reconciler intervenes
    Failed,
    /// Execution completed; terminal
    Succeeded,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Failed => "FAILED",
            Self::Succeeded => "SUCCEEDED",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "UNKNOWN" => Some(Self::Unknown),
            "QUEUED" => Some(Self::Queued),
            "RUNNING" => Some(Self::Running),
            "FAILED" => Some(Self::Failed),
            "SUCCEEDED" => Some(Self::Succeeded),
            _ => None,
        }
    }

    /// Numeric wire code used by the RPC schema.
    pub fn as_code(&self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Queued => 1,
            Self::Running => 2,
            Self::Failed => 3,
            Self::Succeeded => 4,
        }
    }

    /// Decode a wire code. Code 5 (ALL) is filter-only and rejected here;
    /// use [`StatusFilter::from_code`] when decoding list predicates.
    pub fn from_code(code: i32) -> DomainResult<Self> {
        match code {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Queued),
            2 => Ok(Self::Running),
            3 => Ok(Self::Failed),
            4 => Ok(Self::Succeeded),
            other => Err(DomainError::InvalidStatus(format!(
                "status code {} is not storable",
                other
            ))),
        }
    }

    /// Check if this is a terminal state from the engine's point of view.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status predicate for list queries. `All` disables the predicate and is
/// never a storable value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    #[default]
    All,
    Only(TaskStatus),
}

impl StatusFilter {
    /// Decode a wire code, where 5 means "no predicate".
    pub fn from_code(code: i32) -> DomainResult<Self> {
        if code == 5 {
            Ok(Self::All)
        } else {
            TaskStatus::from_code(code).map(Self::Only)
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        if s.eq_ignore_ascii_case("ALL") {
            Some(Self::All)
        } else {
            TaskStatus::from_str(s).map(Self::Only)
        }
    }
}

/// A durable unit of work with an evolving status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned monotonic identifier
    pub id: i64,
    /// Human-readable name
    pub name: String,
    /// Free-text description
    pub description: String,
    /// Key into the plugin registry; checked at handler-resolve time, not on create
    pub task_type: String,
    /// String-to-string parameters handed to the plugin
    pub payload: BTreeMap<String, String>,
    /// Current status
    pub status: TaskStatus,
    /// Persisted retry column carried from the storage schema; written once
    /// as 0 on create and never updated. The agent's local attempt counter
    /// is authoritative.
    pub retries: u32,
    /// Advisory ordering hint; the dispatch queue stays FIFO
    pub priority: u32,
    /// When created
    pub created_at: DateTime<Utc>,
    /// When last updated; bumped atomically with every status write
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by a caller to create a task. The store assigns the id,
/// timestamps, and the initial QUEUED status.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    pub description: String,
    pub task_type: String,
    pub payload: BTreeMap<String, String>,
}

impl NewTask {
    pub fn new(name: impl Into<String>, task_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            task_type: task_type.into(),
            ..Default::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "task name cannot be empty".to_string(),
            ));
        }
        if self.name.len() > 255 {
            return Err(DomainError::ValidationFailed(
                "task name exceeds 255 characters".to_string(),
            ));
        }
        if self.task_type.trim().is_empty() {
            return Err(DomainError::ValidationFailed(
                "task type cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Serialize a payload map to the JSON object form the store persists.
pub fn payload_to_json(payload: &BTreeMap<String, String>) -> DomainResult<String> {
    serde_json::to_string(payload).map_err(Into::into)
}

/// Parse a persisted payload column. Anything other than a JSON object of
/// string values is rejected.
pub fn payload_from_json(raw: &str) -> DomainResult<BTreeMap<String, String>> {
    serde_json::from_str(raw)
        .map_err(|e| DomainError::InvalidPayload(format!("payload is not a string map: {}", e)))
}

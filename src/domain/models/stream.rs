//! Frames carried on the bidirectional agent stream.
//!
//! The RPC binding that moves these frames over a network lives outside the
//! engine; sessions and agents operate on the channel halves produced by
//! [`stream_pair`], which is also where integration tests and the in-process
//! agent plug in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::models::{Task, TaskStatus};

/// Frames sent by an agent to the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamRequest {
    /// Periodic liveness signal
    Heartbeat { timestamp: DateTime<Utc> },
    /// Report a status transition observed by the agent
    UpdateTaskStatus {
        id: i64,
        status: TaskStatus,
        message: String,
    },
}

/// Frames sent by the control plane to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamResponse {
    /// Server-side liveness signal, useful for holding NAT bindings open
    Heartbeat { timestamp: DateTime<Utc> },
    /// A task checked out to this agent for execution
    WorkAssignment(WorkAssignment),
}

/// An in-flight copy of a task sent to a specific agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkAssignment {
    pub assignment_id: i64,
    pub task: Task,
}

impl WorkAssignment {
    pub fn new(task: Task) -> Self {
        Self {
            assignment_id: task.id,
            task,
        }
    }
}

/// Server-side halves of one agent stream.
pub struct ServerStream {
    pub inbound: mpsc::Receiver<StreamRequest>,
    pub outbound: mpsc::Sender<StreamResponse>,
}

/// Agent-side halves of one agent stream.
pub struct AgentStream {
    pub outbound: mpsc::Sender<StreamRequest>,
    pub inbound: mpsc::Receiver<StreamResponse>,
}

/// Create a connected pair of stream ends with the given buffer capacity in
/// each direction. Dropping either end is observed by the peer as a closed
/// stream.
pub fn stream_pair(capacity: usize) -> (ServerStream, AgentStream) {
    let (request_tx, request_rx) = mpsc::channel(capacity);
    let (response_tx, response_rx) = mpsc::channel(capacity);
    (
        ServerStream {
            inbound: request_rx,
            outbound: response_tx,
        },
        AgentStream {
            outbound: request_tx,
            inbound: response_rx,
        },
    )
}

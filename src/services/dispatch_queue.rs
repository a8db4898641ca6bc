//! In-memory bounded FIFO of tasks ready to dispatch.
//!
//! Producers are the server façade (on create and on re-queue) and the
//! reconciler; consumers are the per-session fan-out workers. The queue is
//! deliberately lossy: enqueue never blocks, and an overflow drops the task
//! with a warning. The store still holds the task in QUEUED, so the
//! reconciler re-enqueues anything dropped here at its next sweep.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::domain::models::Task;
use crate::services::metrics::{incr, EngineMetrics};

#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::Sender<Task>,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    metrics: Arc<EngineMetrics>,
}

impl DispatchQueue {
    pub fn new(capacity: usize, metrics: Arc<EngineMetrics>) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            metrics,
        }
    }

    /// Non-blocking enqueue. Overflow and shutdown both drop the task with a
    /// warning; correctness relies on the reconciler, not on this queue.
    pub fn enqueue(&self, task: Task) {
        match self.tx.try_send(task) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(task_id = task.id, "Dispatch queue full, dropping task");
                incr(&self.metrics.queue_drops);
            }
            Err(mpsc::error::TrySendError::Closed(task)) => {
                warn!(task_id = task.id, "Dispatch queue closed, dropping task");
                incr(&self.metrics.queue_drops);
            }
        }
    }

    /// Receive the next queued task. Multiple fan-out workers share this end;
    /// each call takes the receiver lock for one recv.
    pub async fn recv(&self) -> Option<Task> {
        self.rx.lock().await.recv().await
    }
}

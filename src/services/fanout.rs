//! Fan-out of queued tasks onto one agent stream.
//!
//! A per-session dispatcher pulls from the shared dispatch queue and hands
//! each task to a send worker. A semaphore bounds in-flight sends per agent,
//! so a slow agent backs work up into the queue and the store instead of the
//! wire buffer.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::models::{StreamResponse, Task, WorkAssignment};
use crate::services::config::DispatchConfig;
use crate::services::dispatch_queue::DispatchQueue;
use crate::services::metrics::{incr, EngineMetrics};
use crate::services::retry::RetryPolicy;

/// Run the dispatch loop for one session until cancelled or the stream
/// closes. Tasks that cannot be delivered after retries are dropped; their
/// store status is still QUEUED, so the reconciler recovers them.
pub fn spawn_dispatcher(
    queue: DispatchQueue,
    outbound: mpsc::Sender<StreamResponse>,
    config: DispatchConfig,
    metrics: Arc<EngineMetrics>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let semaphore = Arc::new(Semaphore::new(config.fanout_workers));
        let retry = RetryPolicy::new(
            config.send_attempts,
            Duration::from_millis(config.send_backoff_ms),
            Duration::from_secs(5),
        );

        loop {
            let task = tokio::select! {
                _ = cancel.cancelled() => break,
                task = queue.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
            };

            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = semaphore.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let outbound = outbound.clone();
            let retry = retry.clone();
            let metrics = metrics.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let _permit = permit;
                send_assignment(task, &outbound, &retry, &metrics, &cancel).await;
            });
        }
    })
}

async fn send_assignment(
    task: Task,
    outbound: &mpsc::Sender<StreamResponse>,
    retry: &RetryPolicy,
    metrics: &EngineMetrics,
    cancel: &CancellationToken,
) {
    let task_id = task.id;
    let assignment = WorkAssignment::new(task);

    let result = retry
        .run(cancel, || {
            let frame = StreamResponse::WorkAssignment(assignment.clone());
            async move {
                outbound.try_send(frame).map_err(|err| match err {
                    mpsc::error::TrySendError::Full(_) => "outbound buffer full".to_string(),
                    mpsc::error::TrySendError::Closed(_) => "stream closed".to_string(),
                })
            }
        })
        .await;

    match result {
        Ok(()) => {
            incr(&metrics.assignments_sent);
            debug!(task_id, "Work assignment sent");
        }
        Err(err) => {
            // Store status is still QUEUED; the reconciler will pick it up.
            warn!(task_id, "Dropping work assignment after retries: {}", err);
            incr(&metrics.assignments_dropped);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::TaskStatus;
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn test_task(id: i64) -> Task {
        Task {
            id,
            name: format!("t{}", id),
            description: String::new(),
            task_type: "send_email".to_string(),
            payload: BTreeMap::new(),
            status: TaskStatus::Queued,
            retries: 0,
            priority: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatches_queued_tasks_as_assignments() {
        let metrics = Arc::new(EngineMetrics::new());
        let queue = DispatchQueue::new(16, metrics.clone());
        let (tx, mut rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = spawn_dispatcher(
            queue.clone(),
            tx,
            DispatchConfig::default(),
            metrics.clone(),
            cancel.clone(),
        );

        queue.enqueue(test_task(1));
        queue.enqueue(test_task(2));

        let mut seen = Vec::new();
        for _ in 0..2 {
            match rx.recv().await.unwrap() {
                StreamResponse::WorkAssignment(assignment) => {
                    assert_eq!(assignment.assignment_id, assignment.task.id);
                    seen.push(assignment.task.id);
                }
                other => panic!("unexpected frame: {:?}", other),
            }
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
        assert_eq!(metrics.snapshot().assignments_sent, 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn full_outbound_buffer_drops_after_retries() {
        let metrics = Arc::new(EngineMetrics::new());
        let queue = DispatchQueue::new(16, metrics.clone());
        // Capacity 1 and nobody reading: the second assignment cannot fit.
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        let config = DispatchConfig {
            send_attempts: 2,
            send_backoff_ms: 1,
            ..Default::default()
        };
        let handle = spawn_dispatcher(queue.clone(), tx, config, metrics.clone(), cancel.clone());

        queue.enqueue(test_task(1));
        queue.enqueue(test_task(2));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let snap = metrics.snapshot();
            if snap.assignments_sent == 1 && snap.assignments_dropped == 1 {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "metrics: {:?}", snap);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        handle.await.unwrap();
    }
}

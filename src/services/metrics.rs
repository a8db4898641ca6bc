//! Engine counters: cheap atomic taps on named events.
//!
//! These mirror the operation and error counters the service exposes through
//! its monitoring surface; the exporter itself lives outside the engine, so
//! a counter here is just a lock-free integer anyone can snapshot.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub tasks_created: AtomicU64,
    pub status_updates: AtomicU64,
    pub history_write_failures: AtomicU64,
    pub assignments_sent: AtomicU64,
    pub assignments_dropped: AtomicU64,
    pub queue_drops: AtomicU64,
    pub heartbeats_received: AtomicU64,
    pub stream_update_errors: AtomicU64,
    pub tasks_requeued: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            tasks_created: self.tasks_created.load(Ordering::Relaxed),
            status_updates: self.status_updates.load(Ordering::Relaxed),
            history_write_failures: self.history_write_failures.load(Ordering::Relaxed),
            assignments_sent: self.assignments_sent.load(Ordering::Relaxed),
            assignments_dropped: self.assignments_dropped.load(Ordering::Relaxed),
            queue_drops: self.queue_drops.load(Ordering::Relaxed),
            heartbeats_received: self.heartbeats_received.load(Ordering::Relaxed),
            stream_update_errors: self.stream_update_errors.load(Ordering::Relaxed),
            tasks_requeued: self.tasks_requeued.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of all counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub tasks_created: u64,
    pub status_updates: u64,
    pub history_write_failures: u64,
    pub assignments_sent: u64,
    pub assignments_dropped: u64,
    pub queue_drops: u64,
    pub heartbeats_received: u64,
    pub stream_update_errors: u64,
    pub tasks_requeued: u64,
}

/// Increment a counter by one.
pub fn incr(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

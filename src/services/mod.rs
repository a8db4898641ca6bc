//! Control-plane services: the façade, the dispatch path, and the
//! reconciliation loop, plus the shared config/retry/metrics plumbing.

pub mod config;
pub mod dispatch_queue;
pub mod fanout;
pub mod metrics;
pub mod reconciler;
pub mod retry;
pub mod session;
pub mod task_server;

pub use config::{Config, ConfigError, DispatchConfig, ReconcileConfig, WorkerConfig};
pub use dispatch_queue::DispatchQueue;
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use reconciler::{ReconcileReport, Reconciler};
pub use retry::RetryPolicy;
pub use session::Session;
pub use task_server::TaskServer;

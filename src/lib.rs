//! taskherd - distributed task dispatch and execution service.
//!
//! Clients submit tasks to the control plane; agents consume them over a
//! bidirectional stream, execute them through pluggable handlers, and report
//! status transitions back. Every task and every transition is durably
//! recorded, and a reconciler returns stranded work to the queue.

pub mod adapters;
pub mod agent;
pub mod cli;
pub mod domain;
pub mod services;

pub use domain::{DomainError, DomainResult};
pub use services::{Config, ConfigError};

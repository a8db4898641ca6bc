//! Task handlers and their registry.
//!
//! A plugin is the single capability a task type resolves to: execute with a
//! string map and report success or failure. The registry is constructed once
//! at startup from an enumerated list and passed into the executor, so tests
//! can inject their own handlers.

pub mod email;
pub mod query;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::services::config::WorkerConfig;

pub use email::SendEmail;
pub use query::RunQuery;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("unknown plugin type: {0}")]
    UnknownType(String),
    #[error("{0}")]
    ExecutionFailed(String),
}

impl PluginError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::ExecutionFailed(message.into())
    }
}

/// A typed handler for one task-type string.
#[async_trait]
pub trait Plugin: Send + Sync {
    async fn execute(&self, params: &BTreeMap<String, String>) -> Result<(), PluginError>;
}

/// Maps task-type strings to handlers.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Arc<dyn Plugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in handlers, simulating work for roughly the
    /// configured plugin timeout.
    pub fn builtin(config: &WorkerConfig) -> Self {
        let work_time = Duration::from_secs(config.plugin_timeout_secs);
        let mut registry = Self::new();
        registry.register(email::PLUGIN_NAME, Arc::new(SendEmail::new(work_time)));
        registry.register(query::PLUGIN_NAME, Arc::new(RunQuery::new(work_time)));
        registry
    }

    pub fn register(&mut self, type_name: impl Into<String>, plugin: Arc<dyn Plugin>) {
        self.plugins.insert(type_name.into(), plugin);
    }

    pub fn resolve(&self, type_name: &str) -> Result<Arc<dyn Plugin>, PluginError> {
        self.plugins
            .get(type_name)
            .cloned()
            .ok_or_else(|| PluginError::UnknownType(type_name.to_string()))
    }

    pub fn registered_types(&self) -> Vec<&str> {
        let mut types: Vec<_> = self.plugins.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }
}

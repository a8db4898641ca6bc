//! Configuration for the control plane and agents.
//!
//! Loaded from an optional TOML file, then overridden by the environment
//! variables the deployment surface exposes: `DATABASE_URL`, `SERVER_PORT`,
//! `SERVER_ENDPOINT`, `WORKER_COUNT`, and `TASK_TIME_OUT`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Validation failed for {field}: {reason}")]
    ValidationError { field: String, reason: String },
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub dispatch: DispatchConfig,
    pub reconcile: ReconcileConfig,
    pub worker: WorkerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            dispatch: DispatchConfig::default(),
            reconcile: ReconcileConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen port for the RPC binding in front of the engine.
    pub port: u16,
    /// Control plane URL agents connect to.
    pub endpoint: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            endpoint: "http://localhost:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:taskherd.db".to_string(),
            max_connections: 5,
            min_connections: 1,
        }
    }
}

/// Dispatch-path tuning: queue depth, per-session fan-out, send retries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Capacity of the in-memory queue of tasks awaiting send.
    pub queue_capacity: usize,
    /// Fan-out workers per agent session.
    pub fanout_workers: usize,
    /// Capacity of a session's outbound assignment channel.
    pub outbound_capacity: usize,
    /// Attempts when sending an assignment on a stream.
    pub send_attempts: u32,
    /// Initial backoff between send attempts (ms).
    pub send_backoff_ms: u64,
    /// Cadence of server-side heartbeats on each stream (seconds, 0 disables).
    pub heartbeat_interval_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            fanout_workers: 10,
            outbound_capacity: 100,
            send_attempts: 3,
            send_backoff_ms: 100,
            heartbeat_interval_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Sweep cadence in seconds.
    pub interval_secs: u64,
    /// Age past which RUNNING/QUEUED tasks count as stranded. Defaults to
    /// the sweep interval when unset.
    pub deadline_secs: Option<u64>,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            deadline_secs: None,
        }
    }
}

impl ReconcileConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs.unwrap_or(self.interval_secs))
    }
}

/// Agent-side execution tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Handler-level attempts per assignment.
    pub max_attempts: u32,
    /// Base wait after a failed attempt (ms); doubles per attempt.
    pub attempt_backoff_ms: u64,
    /// Retries for each status update sent on the stream.
    pub status_send_retries: u32,
    /// Linear backoff step between status send retries (ms).
    pub status_send_backoff_ms: u64,
    /// Plugin execution timeout in seconds; a 5 s grace is added on top.
    pub plugin_timeout_secs: u64,
    /// Soft cap on concurrently executing assignments.
    pub max_in_flight: usize,
    /// Agent heartbeat cadence (seconds).
    pub heartbeat_interval_secs: u64,
    /// Wait before the agent re-opens a dropped stream (seconds).
    pub reconnect_delay_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            attempt_backoff_ms: 1_000,
            status_send_retries: 5,
            status_send_backoff_ms: 1_000,
            plugin_timeout_secs: 10,
            max_in_flight: 10,
            heartbeat_interval_secs: 5,
            reconnect_delay_secs: 5,
        }
    }
}

impl WorkerConfig {
    /// Hard bound on one plugin invocation: the configured timeout plus grace.
    pub fn execution_deadline(&self) -> Duration {
        Duration::from_secs(self.plugin_timeout_secs + 5)
    }
}

impl Config {
    /// Load from a TOML file if present, apply environment overrides, and
    /// validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            _ => Self::default(),
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(url) = read_env("DATABASE_URL") {
            self.database.url = url;
        }
        if let Some(endpoint) = read_env("SERVER_ENDPOINT") {
            self.server.endpoint = endpoint;
        }
        if let Some(port) = read_env("SERVER_PORT") {
            self.server.port = parse_env("SERVER_PORT", &port)?;
        }
        if let Some(count) = read_env("WORKER_COUNT") {
            self.dispatch.fanout_workers = parse_env("WORKER_COUNT", &count)?;
        }
        if let Some(timeout) = read_env("TASK_TIME_OUT") {
            self.worker.plugin_timeout_secs = parse_env("TASK_TIME_OUT", &timeout)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dispatch.queue_capacity == 0 {
            return Err(ConfigError::ValidationError {
                field: "dispatch.queue_capacity".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.dispatch.fanout_workers == 0 {
            return Err(ConfigError::ValidationError {
                field: "dispatch.fanout_workers".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.worker.max_attempts == 0 {
            return Err(ConfigError::ValidationError {
                field: "worker.max_attempts".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.reconcile.interval_secs == 0 {
            return Err(ConfigError::ValidationError {
                field: "reconcile.interval_secs".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

fn read_env(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.is_empty())
}

fn parse_env<T: std::str::FromStr>(var: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidEnv {
        var: var.to_string(),
        value: value.to_string(),
    })
}

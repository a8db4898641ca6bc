//! Command-line interface: argument definitions and dispatch.

pub mod commands;
pub mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use crate::adapters::sqlite::{
    all_embedded_migrations, create_pool, Migrator, PoolConfig, SqliteHistoryStore,
    SqliteTaskStore,
};
use crate::services::{Config, DispatchQueue, EngineMetrics, TaskServer};

#[derive(Parser)]
#[command(name = "taskherd", version, about = "Distributed task dispatch and execution service")]
pub struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the control plane with in-process agents
    Serve {
        /// Number of agents to run; 0 runs a bare control plane that only
        /// reconciles
        #[arg(long, default_value_t = 1)]
        agents: usize,
    },
    /// Create and inspect tasks
    #[command(subcommand)]
    Task(TaskCommands),
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a new task
    Create {
        #[arg(long)]
        name: String,
        /// Task type resolved by the agent's plugin registry
        #[arg(long = "type")]
        task_type: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Payload entries as key=value, repeatable
        #[arg(long = "param", value_parser = parse_key_value)]
        params: Vec<(String, String)>,
        #[arg(long)]
        json: bool,
    },
    /// Show one task
    Get {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// List tasks
    List {
        #[arg(long, default_value_t = 100)]
        limit: i64,
        #[arg(long, default_value_t = 0)]
        offset: i64,
        /// QUEUED, RUNNING, FAILED, SUCCEEDED or ALL
        #[arg(long)]
        status: Option<String>,
        #[arg(long = "type")]
        task_type: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Show a task's transition history
    History {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        json: bool,
    },
    /// Show task counts per status
    Status {
        #[arg(long)]
        json: bool,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let server = build_server(&config).await?;

    match cli.command {
        Commands::Serve { agents } => {
            commands::serve::handle_serve(server, config, agents).await
        }
        Commands::Task(task_command) => match task_command {
            TaskCommands::Create {
                name,
                task_type,
                description,
                params,
                json,
            } => {
                commands::task::handle_create(&server, name, task_type, description, params, json)
                    .await
            }
            TaskCommands::Get { id, json } => commands::task::handle_get(&server, id, json).await,
            TaskCommands::List {
                limit,
                offset,
                status,
                task_type,
                json,
            } => {
                commands::task::handle_list(&server, limit, offset, status, task_type, json).await
            }
            TaskCommands::History { id, json } => {
                commands::task::handle_history(&server, id, json).await
            }
            TaskCommands::Status { json } => commands::task::handle_status(&server, json).await,
        },
    }
}

async fn build_server(config: &Config) -> Result<Arc<TaskServer>> {
    let pool = create_pool(
        &config.database.url,
        Some(PoolConfig {
            max_connections: config.database.max_connections,
            min_connections: config.database.min_connections,
            ..Default::default()
        }),
    )
    .await
    .context("Failed to open database")?;

    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .context("Failed to run migrations")?;

    let metrics = Arc::new(EngineMetrics::new());
    let queue = DispatchQueue::new(config.dispatch.queue_capacity, metrics.clone());

    Ok(Arc::new(TaskServer::new(
        Arc::new(SqliteTaskStore::new(pool.clone())),
        Arc::new(SqliteHistoryStore::new(pool)),
        queue,
        metrics,
        CancellationToken::new(),
    )))
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

//! Handlers for the task subcommands.

use anyhow::{Context, Result};

use crate::cli::output::table::{
    format_history_table, format_status_table, format_task_detail, format_task_table,
};
use crate::domain::models::{NewTask, StatusFilter};
use crate::domain::ports::TaskFilter;
use crate::services::TaskServer;

pub async fn handle_create(
    server: &TaskServer,
    name: String,
    task_type: String,
    description: String,
    params: Vec<(String, String)>,
    json: bool,
) -> Result<()> {
    let mut task = NewTask::new(name, task_type).with_description(description);
    for (key, value) in params {
        task = task.with_param(key, value);
    }

    let id = server
        .create_task(task)
        .await
        .context("Failed to create task")?;

    if json {
        println!("{}", serde_json::json!({ "id": id }));
    } else {
        println!("Task created with id {}", id);
    }
    Ok(())
}

pub async fn handle_get(server: &TaskServer, id: i64, json: bool) -> Result<()> {
    let task = server
        .get_task(id)
        .await
        .context(format!("Failed to retrieve task {}", id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
    } else {
        println!("{}", format_task_detail(&task));
    }
    Ok(())
}

pub async fn handle_list(
    server: &TaskServer,
    limit: i64,
    offset: i64,
    status: Option<String>,
    task_type: Option<String>,
    json: bool,
) -> Result<()> {
    let status = match status.as_deref() {
        None => StatusFilter::All,
        Some(raw) => StatusFilter::from_str(raw)
            .ok_or_else(|| anyhow::anyhow!("Unknown status filter: {}", raw))?,
    };

    let tasks = server
        .list_tasks(TaskFilter {
            limit,
            offset,
            status,
            task_type,
        })
        .await
        .context("Failed to list tasks")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
    } else if tasks.is_empty() {
        println!("No tasks found.");
    } else {
        println!("{}", format_task_table(&tasks));
        println!("Showing {} task(s)", tasks.len());
    }
    Ok(())
}

pub async fn handle_history(server: &TaskServer, id: i64, json: bool) -> Result<()> {
    let history = server
        .get_task_history(id)
        .await
        .context(format!("Failed to retrieve history for task {}", id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&history)?);
    } else if history.is_empty() {
        println!("No history for task {}.", id);
    } else {
        println!("{}", format_history_table(&history));
    }
    Ok(())
}

pub async fn handle_status(server: &TaskServer, json: bool) -> Result<()> {
    let counts = server
        .get_status_counts()
        .await
        .context("Failed to retrieve status counts")?;

    if json {
        let by_name: std::collections::BTreeMap<_, _> = counts
            .iter()
            .map(|(status, count)| (status.as_str(), count))
            .collect();
        println!("{}", serde_json::to_string_pretty(&by_name)?);
    } else if counts.is_empty() {
        println!("No tasks yet.");
    } else {
        println!("{}", format_status_table(&counts));
    }
    Ok(())
}

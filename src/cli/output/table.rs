//! Table output formatting for CLI commands.

use std::collections::HashMap;

use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};

use crate::domain::models::{Task, TaskHistory, TaskStatus};

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn header(cells: &[&str]) -> Vec<Cell> {
    cells
        .iter()
        .map(|c| Cell::new(c).add_attribute(Attribute::Bold))
        .collect()
}

fn status_cell(status: TaskStatus) -> Cell {
    Cell::new(status.as_str()).fg(status_color(status))
}

fn status_color(status: TaskStatus) -> Color {
    match status {
        TaskStatus::Queued => Color::Yellow,
        TaskStatus::Running => Color::Cyan,
        TaskStatus::Succeeded => Color::Green,
        TaskStatus::Failed => Color::Red,
        TaskStatus::Unknown => Color::Grey,
    }
}

pub fn format_task_table(tasks: &[Task]) -> String {
    let mut table = base_table();
    table.set_header(header(&["ID", "Name", "Type", "Status", "Created"]));

    for task in tasks {
        table.add_row(vec![
            Cell::new(task.id),
            Cell::new(truncate(&task.name, 40)),
            Cell::new(&task.task_type),
            status_cell(task.status),
            Cell::new(task.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
        ]);
    }
    table.to_string()
}

pub fn format_task_detail(task: &Task) -> String {
    let mut table = base_table();
    table.set_header(header(&["Field", "Value"]));
    table.add_row(vec![Cell::new("ID"), Cell::new(task.id)]);
    table.add_row(vec![Cell::new("Name"), Cell::new(&task.name)]);
    table.add_row(vec![Cell::new("Description"), Cell::new(&task.description)]);
    table.add_row(vec![Cell::new("Type"), Cell::new(&task.task_type)]);
    table.add_row(vec![Cell::new("Status"), status_cell(task.status)]);
    table.add_row(vec![Cell::new("Retries"), Cell::new(task.retries)]);
    table.add_row(vec![Cell::new("Priority"), Cell::new(task.priority)]);
    table.add_row(vec![
        Cell::new("Payload"),
        Cell::new(
            serde_json::to_string(&task.payload).unwrap_or_else(|_| "{}".to_string()),
        ),
    ]);
    table.add_row(vec![
        Cell::new("Created at"),
        Cell::new(task.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
    ]);
    table.add_row(vec![
        Cell::new("Updated at"),
        Cell::new(task.updated_at.format("%Y-%m-%d %H:%M:%S UTC")),
    ]);
    table.to_string()
}

pub fn format_history_table(entries: &[TaskHistory]) -> String {
    let mut table = base_table();
    table.set_header(header(&["ID", "Status", "Details", "Created"]));

    for entry in entries {
        table.add_row(vec![
            Cell::new(entry.id),
            status_cell(entry.status),
            Cell::new(truncate(&entry.details, 60)),
            Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S UTC")),
        ]);
    }
    table.to_string()
}

pub fn format_status_table(counts: &HashMap<TaskStatus, i64>) -> String {
    let mut table = base_table();
    table.set_header(header(&["Status", "Count"]));

    let mut rows: Vec<_> = counts.iter().collect();
    rows.sort_by_key(|(status, _)| status.as_code());
    for (status, count) in rows {
        table.add_row(vec![status_cell(*status), Cell::new(count)]);
    }
    table.to_string()
}

fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_text_alone() {
        assert_eq!(truncate("short", 10), "short");
        assert!(truncate(&"x".repeat(50), 10).ends_with("..."));
    }

    #[test]
    fn status_table_orders_by_wire_code() {
        let mut counts = HashMap::new();
        counts.insert(TaskStatus::Succeeded, 2);
        counts.insert(TaskStatus::Queued, 1);
        let rendered = format_status_table(&counts);
        let queued_pos = rendered.find("QUEUED").unwrap();
        let succeeded_pos = rendered.find("SUCCEEDED").unwrap();
        assert!(queued_pos < succeeded_pos);
    }
}

//! `commitscope list`.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Cell;

use crate::cli::output::{format_time, list_table, output, render_list, truncate, CommandOutput};
use crate::cli::Runtime;
use crate::domain::models::{AnalysisTask, TaskStatus};
use crate::domain::ports::TaskFilter;

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only tasks of this user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Filter by status (pending, running, completed, failed, cancelled)
    #[arg(short, long, value_parser = parse_status)]
    pub status: Option<TaskStatus>,

    /// Maximum number of tasks to display
    #[arg(short, long, default_value = "50")]
    pub limit: usize,
}

fn parse_status(raw: &str) -> Result<TaskStatus, String> {
    TaskStatus::from_str(&raw.to_lowercase()).ok_or_else(|| format!("unknown status '{}'", raw))
}

#[derive(Debug, serde::Serialize)]
pub struct TaskListOutput {
    pub tasks: Vec<AnalysisTask>,
    pub total: usize,
}

impl CommandOutput for TaskListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["id", "user", "repository", "type", "status", "progress", "created"]);
        for task in &self.tasks {
            table.add_row(vec![
                Cell::new(&task.id.to_string()[..8]),
                Cell::new(truncate(&task.user_id, 16)),
                Cell::new(truncate(&task.repository, 32)),
                Cell::new(task.analysis_type.as_str()),
                Cell::new(task.status.as_str()),
                Cell::new(format!("{}%", task.progress)),
                Cell::new(format_time(&task.created_at)),
            ]);
        }
        render_list("task", &table, self.total)
    }
}

pub async fn execute(args: ListArgs, runtime: &Runtime, json_mode: bool) -> Result<()> {
    let mut filter = TaskFilter { user_id: args.user, ..Default::default() }.limit(args.limit);
    if let Some(status) = args.status {
        filter = filter.with_statuses(&[status]);
    }
    let tasks = runtime.engine.list_tasks(filter).await.context("Failed to list tasks")?;
    let total = tasks.len();
    output(&TaskListOutput { tasks, total }, json_mode);
    Ok(())
}

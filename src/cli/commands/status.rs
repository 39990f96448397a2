//! `commitscope status`: progress of one task.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use crate::cli::output::{format_time, output, CommandOutput};
use crate::cli::{parse_task_id, Runtime};
use crate::domain::models::{AnalysisTask, TaskStatusView};
use crate::services::AnalysisEngine;

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Task ID
    pub task_id: String,

    /// Follow progress until the task finishes
    #[arg(short, long)]
    pub watch: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct StatusOutput {
    #[serde(flatten)]
    pub view: TaskStatusView,
    pub user_id: String,
    pub repository: String,
    pub tokens_used: u64,
    pub cost_usd: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<AnalysisTask> for StatusOutput {
    fn from(task: AnalysisTask) -> Self {
        Self {
            view: task.status_view(),
            user_id: task.user_id,
            repository: task.repository,
            tokens_used: task.tokens_used,
            cost_usd: task.cost_usd,
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
        }
    }
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            format!("Task {}", self.view.task_id),
            format!("  Status: {}", self.view.status),
            format!("  Progress: {}% ({})", self.view.progress, self.view.current_step),
            format!("  Repository: {}", self.repository),
            format!("  User: {}", self.user_id),
            format!("  Created at: {}", format_time(&self.created_at)),
        ];
        if let Some(started) = &self.started_at {
            lines.push(format!("  Started at: {}", format_time(started)));
        }
        if let Some(completed) = &self.completed_at {
            lines.push(format!("  Finished at: {}", format_time(completed)));
        }
        if self.tokens_used > 0 {
            lines.push(format!("  Usage: {} tokens, ${:.4}", self.tokens_used, self.cost_usd));
        }
        if let (Some(kind), Some(message)) = (&self.view.error_kind, &self.view.error_message) {
            lines.push(format!("  Error ({}): {}", kind.as_str(), message));
        }
        if let Some(export_error) = &self.view.export_error {
            lines.push(format!("  Export: {}", export_error));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: StatusArgs, runtime: &Runtime, json_mode: bool) -> Result<()> {
    let task_id = parse_task_id(&args.task_id)?;
    let task = if args.watch {
        let interval = Duration::from_millis(runtime.config.engine.cancel_poll_interval_ms);
        wait_for_terminal(&runtime.engine, task_id, interval).await?
    } else {
        fetch(&runtime.engine, task_id).await?
    };
    output(&StatusOutput::from(task), json_mode);
    Ok(())
}

async fn fetch(engine: &AnalysisEngine, task_id: uuid::Uuid) -> Result<AnalysisTask> {
    engine
        .get_task(task_id)
        .await
        .context("Failed to load task")?
        .ok_or_else(|| anyhow::anyhow!("Task {} not found. Use 'commitscope list' to see tasks.", task_id))
}

/// Poll until the task reaches a terminal status. Progress changes are
/// logged as they are observed.
pub async fn wait_for_terminal(
    engine: &AnalysisEngine,
    task_id: uuid::Uuid,
    interval: Duration,
) -> Result<AnalysisTask> {
    let mut last_seen: Option<(u8, String)> = None;
    loop {
        let task = fetch(engine, task_id).await?;
        if task.is_terminal() {
            return Ok(task);
        }
        let current = (task.progress, task.current_step.clone());
        if last_seen.as_ref() != Some(&current) {
            tracing::info!(%task_id, progress = current.0, step = %current.1, "task progress");
            last_seen = Some(current);
        }
        tokio::time::sleep(interval).await;
    }
}

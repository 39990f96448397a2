//! `commitscope attempts`: the provider audit trail of one task.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Cell;
use uuid::Uuid;

use crate::cli::output::{list_table, output, render_list, truncate, CommandOutput};
use crate::cli::{parse_task_id, Runtime};
use crate::domain::models::ProviderAttempt;

#[derive(Args, Debug)]
pub struct AttemptsArgs {
    /// Task ID
    pub task_id: String,
}

#[derive(Debug, serde::Serialize)]
pub struct AttemptListOutput {
    pub task_id: Uuid,
    pub attempts: Vec<ProviderAttempt>,
}

impl CommandOutput for AttemptListOutput {
    fn to_human(&self) -> String {
        let mut table = list_table(&["#", "provider", "model", "outcome", "latency", "tokens", "error"]);
        for a in &self.attempts {
            let error = match (&a.error_kind, &a.error_message) {
                (Some(kind), Some(msg)) => format!("{}: {}", kind.as_str(), truncate(msg, 40)),
                (Some(kind), None) => kind.as_str().to_string(),
                _ => String::new(),
            };
            table.add_row(vec![
                Cell::new(a.attempt_index),
                Cell::new(&a.provider),
                Cell::new(&a.model),
                Cell::new(a.outcome.as_str()),
                Cell::new(format!("{}ms", a.latency_ms)),
                Cell::new(a.tokens_used.map_or_else(|| "-".to_string(), |t| t.to_string())),
                Cell::new(error),
            ]);
        }
        render_list("attempt", &table, self.attempts.len())
    }
}

pub async fn execute(args: AttemptsArgs, runtime: &Runtime, json_mode: bool) -> Result<()> {
    let task_id = parse_task_id(&args.task_id)?;
    if runtime.engine.get_task(task_id).await?.is_none() {
        anyhow::bail!("Task {} not found", task_id);
    }
    let attempts = runtime.engine.list_attempts(task_id).await.context("Failed to list attempts")?;
    output(&AttemptListOutput { task_id, attempts }, json_mode);
    Ok(())
}

//! `commitscope cancel`.

use anyhow::{Context, Result};
use clap::Args;
use uuid::Uuid;

use crate::cli::output::{output, CommandOutput};
use crate::cli::{parse_task_id, Runtime};
use crate::services::CancelOutcome;

#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Task ID
    pub task_id: String,
}

#[derive(Debug, serde::Serialize)]
pub struct CancelOutput {
    pub task_id: Uuid,
    pub outcome: CancelOutcome,
}

impl CommandOutput for CancelOutput {
    fn to_human(&self) -> String {
        match self.outcome {
            CancelOutcome::Ack => format!("Cancellation requested for task {}.", self.task_id),
            CancelOutcome::AlreadyTerminal => {
                format!("Task {} has already finished; nothing to cancel.", self.task_id)
            }
            CancelOutcome::TaskNotFound => format!("Task {} not found.", self.task_id),
        }
    }
}

pub async fn execute(args: CancelArgs, runtime: &Runtime, json_mode: bool) -> Result<()> {
    let task_id = parse_task_id(&args.task_id)?;
    let outcome = runtime.engine.cancel(task_id).await.context("Failed to cancel task")?;
    if outcome == CancelOutcome::TaskNotFound {
        anyhow::bail!("Task {} not found. Use 'commitscope list' to see tasks.", task_id);
    }
    output(&CancelOutput { task_id, outcome }, json_mode);
    Ok(())
}

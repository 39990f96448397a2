//! `commitscope export`: queue a render of a completed result.

use anyhow::{Context, Result};
use clap::Args;
use uuid::Uuid;

use crate::cli::output::{output, CommandOutput};
use crate::cli::{parse_task_id, Runtime};
use crate::domain::models::{ExportFormat, ExportOptions, ExportRequestOutcome};

#[derive(Args, Debug)]
pub struct ExportArgs {
    /// Task ID
    pub task_id: String,

    /// Output format (excel, csv, json, pdf)
    #[arg(short, long, default_value = "json", value_parser = parse_format)]
    pub format: ExportFormat,

    /// Leave charts out of the export
    #[arg(long)]
    pub no_charts: bool,

    /// Include raw commit data
    #[arg(long)]
    pub raw_data: bool,
}

fn parse_format(raw: &str) -> Result<ExportFormat, String> {
    ExportFormat::from_str(raw).ok_or_else(|| format!("unknown export format '{}'", raw))
}

#[derive(Debug, serde::Serialize)]
pub struct ExportOutput {
    pub task_id: Uuid,
    pub format: ExportFormat,
    pub job_ref: String,
}

impl CommandOutput for ExportOutput {
    fn to_human(&self) -> String {
        format!(
            "Export queued for task {}.\n  Format: {}\n  Job: {}",
            self.task_id,
            self.format.as_str(),
            self.job_ref
        )
    }
}

pub async fn execute(args: ExportArgs, runtime: &Runtime, json_mode: bool) -> Result<()> {
    let task_id = parse_task_id(&args.task_id)?;
    let options = ExportOptions {
        format: args.format,
        include_charts: !args.no_charts,
        include_raw_data: args.raw_data,
    };

    match runtime.engine.request_export(task_id, options).await.context("Failed to request export")? {
        ExportRequestOutcome::Enqueued { job_ref } => {
            output(&ExportOutput { task_id, format: args.format, job_ref }, json_mode);
            Ok(())
        }
        ExportRequestOutcome::NotReady { status } => {
            anyhow::bail!("Task {} is {}; only completed tasks can be exported", task_id, status)
        }
        ExportRequestOutcome::NotFound => anyhow::bail!("Task {} not found", task_id),
    }
}

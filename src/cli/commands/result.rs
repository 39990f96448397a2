//! `commitscope result`: the structured result of a completed task.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Cell;

use crate::cli::output::{format_time, list_table, output, CommandOutput};
use crate::cli::{parse_task_id, Runtime};
use crate::domain::models::{AnalysisResult, ResultLookup};

#[derive(Args, Debug)]
pub struct ResultArgs {
    /// Task ID
    pub task_id: String,

    /// Also print the raw provider output
    #[arg(long)]
    pub raw: bool,
}

#[derive(Debug, serde::Serialize)]
pub struct ResultOutput {
    #[serde(flatten)]
    pub result: AnalysisResult,
    #[serde(skip)]
    pub show_raw: bool,
}

impl CommandOutput for ResultOutput {
    fn to_human(&self) -> String {
        let r = &self.result;
        let mut lines = vec![
            format!("Result {} for task {}", r.id, r.task_id),
            format!("  Provider: {} ({})", r.provider, r.model),
            format!(
                "  Commits analyzed: {} (+{} / -{}, {} files)",
                r.metadata.commits_analyzed,
                r.metadata.total_additions,
                r.metadata.total_deletions,
                r.metadata.total_files_changed
            ),
            format!("  Tokens: {}  Cost: ${:.4}", r.metadata.tokens_used, r.cost_usd),
            format!("  Created at: {}", format_time(&r.created_at)),
            String::new(),
            r.narrative.clone(),
        ];

        if !r.key_insights.is_empty() {
            lines.push("\nKey insights:".to_string());
            lines.extend(r.key_insights.iter().map(|i| format!("  - {}", i)));
        }
        if !r.recommendations.is_empty() {
            lines.push("\nRecommendations:".to_string());
            lines.extend(r.recommendations.iter().map(|i| format!("  - {}", i)));
        }
        if !r.metrics.is_empty() {
            let mut table = list_table(&["metric", "value", "scale"]);
            for (name, metric) in &r.metrics {
                table.add_row(vec![
                    Cell::new(name),
                    Cell::new(format!("{:.2}", metric.value)),
                    Cell::new(format!("{}-{}", metric.min, metric.max)),
                ]);
            }
            lines.push(format!("\nMetrics:\n{}", table));
        }
        if self.show_raw {
            lines.push(format!("\nRaw output:\n{}", r.raw_output));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: ResultArgs, runtime: &Runtime, json_mode: bool) -> Result<()> {
    let task_id = parse_task_id(&args.task_id)?;
    match runtime.engine.get_result(task_id).await.context("Failed to load result")? {
        ResultLookup::Ready { result } => {
            output(&ResultOutput { result: *result, show_raw: args.raw }, json_mode);
            Ok(())
        }
        ResultLookup::NotReady { status } => {
            anyhow::bail!("Task {} has no result yet (status: {})", task_id, status)
        }
        ResultLookup::NotFound => anyhow::bail!("Task {} not found", task_id),
    }
}

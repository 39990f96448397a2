//! `commitscope stats`: usage and cost over a period.

use anyhow::{Context, Result};
use clap::Args;
use comfy_table::Cell;

use crate::cli::output::{list_table, output, CommandOutput};
use crate::cli::Runtime;
use crate::domain::models::EngineStats;

#[derive(Args, Debug)]
pub struct StatsArgs {
    /// Only tasks of this user
    #[arg(short, long)]
    pub user: Option<String>,

    /// Period in days, counting back from now
    #[arg(short, long, default_value = "30")]
    pub days: i64,
}

#[derive(Debug, serde::Serialize)]
pub struct StatsOutput {
    #[serde(flatten)]
    pub stats: EngineStats,
    pub user: Option<String>,
}

impl CommandOutput for StatsOutput {
    fn to_human(&self) -> String {
        let s = &self.stats;
        let scope = self.user.as_deref().map_or_else(|| "all users".to_string(), |u| format!("user {}", u));
        let mut lines = vec![
            format!("Usage over the last {} days ({}):", s.period_days, scope),
            format!("  Tasks: {}", s.total_tasks),
            format!(
                "    pending {}, running {}, completed {}, failed {}, cancelled {}",
                s.pending, s.running, s.completed, s.failed, s.cancelled
            ),
            format!("  Tokens: {}", s.total_tokens),
            format!("  Cost: ${:.4}", s.total_cost_usd),
        ];
        if let Some(avg) = s.avg_duration_secs {
            lines.push(format!("  Average duration: {:.1}s", avg));
        }
        if let Some(repo) = &s.most_analyzed_repository {
            lines.push(format!("  Most analyzed repository: {}", repo));
        }

        if !s.providers.is_empty() {
            let mut table = list_table(&["provider", "attempts", "failures", "tokens", "cost"]);
            for p in &s.providers {
                table.add_row(vec![
                    Cell::new(&p.provider),
                    Cell::new(p.attempts),
                    Cell::new(p.failures),
                    Cell::new(p.tokens),
                    Cell::new(format!("${:.4}", p.cost_usd)),
                ]);
            }
            lines.push(format!("\nProviders:\n{}", table));
        }

        lines.join("\n")
    }
}

pub async fn execute(args: StatsArgs, runtime: &Runtime, json_mode: bool) -> Result<()> {
    if args.days <= 0 {
        anyhow::bail!("--days must be positive");
    }
    let stats = runtime
        .engine
        .stats(args.user.as_deref(), args.days)
        .await
        .context("Failed to compute statistics")?;
    output(&StatsOutput { stats, user: args.user }, json_mode);
    Ok(())
}

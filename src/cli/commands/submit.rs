//! `commitscope submit`: validate, admit and queue an analysis request.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Args;
use uuid::Uuid;

use super::status::{wait_for_terminal, StatusOutput};
use crate::cli::output::{output, CommandOutput};
use crate::cli::Runtime;
use crate::domain::errors::SubmitError;
use crate::domain::models::{
    AnalysisRequest, AnalysisType, Config, DateRange, ExportFormat, ExportOptions, GenerationParams,
};

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Repository in owner/name form
    pub repository: String,

    /// User the task is accounted to
    #[arg(short, long, env = "COMMITSCOPE_USER", default_value = "local")]
    pub user: String,

    /// Only analyze commits whose author name contains this text
    #[arg(short, long)]
    pub developer: Option<String>,

    /// Analysis type (performance, quality, security, comprehensive)
    #[arg(short = 't', long = "type", default_value = "comprehensive", value_parser = parse_analysis_type)]
    pub analysis_type: AnalysisType,

    /// Analyze the last N days when --from/--to are not given
    #[arg(long, default_value = "30")]
    pub days: i64,

    /// First day of the range (YYYY-MM-DD)
    #[arg(long)]
    pub from: Option<NaiveDate>,

    /// Last day of the range (YYYY-MM-DD), inclusive
    #[arg(long)]
    pub to: Option<NaiveDate>,

    /// Primary provider; defaults to the head of the fallback list
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Model for the primary provider; defaults to its configured model
    #[arg(short, long)]
    pub model: Option<String>,

    #[arg(long, default_value = "0.7")]
    pub temperature: f32,

    #[arg(long, default_value = "2000")]
    pub max_tokens: u32,

    /// File holding a custom prompt template
    #[arg(long)]
    pub template: Option<PathBuf>,

    /// Export format to queue automatically on completion (excel, csv, json, pdf)
    #[arg(long, value_parser = parse_export_format)]
    pub export: Option<ExportFormat>,

    /// Leave charts out of the automatic export
    #[arg(long, requires = "export")]
    pub no_charts: bool,

    /// Include raw commit data in the automatic export
    #[arg(long, requires = "export")]
    pub raw_data: bool,

    /// Wait for the task to finish and print its final status
    #[arg(short, long)]
    pub wait: bool,
}

fn parse_analysis_type(raw: &str) -> Result<AnalysisType, String> {
    AnalysisType::from_str(raw).ok_or_else(|| format!("unknown analysis type '{}'", raw))
}

fn parse_export_format(raw: &str) -> Result<ExportFormat, String> {
    ExportFormat::from_str(raw).ok_or_else(|| format!("unknown export format '{}'", raw))
}

#[derive(Debug, serde::Serialize)]
pub struct SubmitOutput {
    pub task_id: Uuid,
    pub repository: String,
    pub analysis_type: AnalysisType,
    pub provider: String,
    pub model: String,
    pub date_range: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_status: Option<StatusOutput>,
}

impl CommandOutput for SubmitOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![
            "Analysis submitted.".to_string(),
            format!("  Task ID: {}", self.task_id),
            format!("  Repository: {}", self.repository),
            format!("  Type: {}", self.analysis_type),
            format!("  Provider: {} ({})", self.provider, self.model),
            format!("  Range: {}", self.date_range),
        ];
        if let Some(status) = &self.final_status {
            lines.push(String::new());
            lines.push(status.to_human());
        }
        lines.join("\n")
    }
}

pub async fn execute(args: SubmitArgs, runtime: &Runtime, json_mode: bool) -> Result<()> {
    let request = build_request(&args, &runtime.config).await?;
    let summary = (
        request.repository.clone(),
        request.analysis_type,
        request.provider.clone(),
        request.model.clone(),
        request.date_range.label(),
    );

    let task_id = match runtime.engine.submit(request).await {
        Ok(id) => id,
        Err(SubmitError::Rejected(reason)) => {
            anyhow::bail!("Submission rejected: {}. Wait for running tasks to finish and retry.", reason)
        }
        Err(e) => return Err(e).context("Failed to submit analysis"),
    };

    let final_status = if args.wait {
        let interval = Duration::from_millis(runtime.config.engine.cancel_poll_interval_ms);
        Some(StatusOutput::from(wait_for_terminal(&runtime.engine, task_id, interval).await?))
    } else {
        None
    };

    let (repository, analysis_type, provider, model, date_range) = summary;
    output(
        &SubmitOutput { task_id, repository, analysis_type, provider, model, date_range, final_status },
        json_mode,
    );
    Ok(())
}

async fn build_request(args: &SubmitArgs, config: &Config) -> Result<AnalysisRequest> {
    let provider = match &args.provider {
        Some(p) => p.clone(),
        None => config
            .providers
            .default_fallback
            .first()
            .cloned()
            .context("No provider given and the default fallback list is empty")?,
    };
    let model = match &args.model {
        Some(m) => m.clone(),
        None => config
            .providers
            .backends
            .get(&provider)
            .map(|s| s.default_model.clone())
            .with_context(|| format!("Unknown provider '{}'; pass --model explicitly", provider))?,
    };

    let prompt_template = match &args.template {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read template {}", path.display()))?,
        ),
        None => None,
    };

    Ok(AnalysisRequest {
        user_id: args.user.clone(),
        repository: args.repository.clone(),
        developer_filter: args.developer.clone(),
        analysis_type: args.analysis_type,
        date_range: date_range(args.from, args.to, args.days),
        provider,
        model,
        params: GenerationParams { temperature: args.temperature, max_tokens: args.max_tokens },
        prompt_template,
        export: args.export.map(|format| ExportOptions {
            format,
            include_charts: !args.no_charts,
            include_raw_data: args.raw_data,
        }),
    })
}

/// Range from explicit days, falling back to the last `days` days. `to` is
/// inclusive up to the end of that day.
fn date_range(from: Option<NaiveDate>, to: Option<NaiveDate>, days: i64) -> DateRange {
    if from.is_none() && to.is_none() {
        return DateRange::last_days(days);
    }
    let to = to.map_or_else(Utc::now, end_of_day);
    let from = from.map_or_else(|| to - chrono::Duration::days(days), start_of_day);
    DateRange::new(from, to)
}

fn start_of_day(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

fn end_of_day(day: NaiveDate) -> DateTime<Utc> {
    start_of_day(day) + chrono::Duration::days(1) - chrono::Duration::seconds(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use clap::Parser;

    fn parse(extra: &[&str]) -> SubmitArgs {
        let mut argv = vec!["commitscope", "submit", "octo/widgets"];
        argv.extend_from_slice(extra);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Submit(args) => args,
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_explicit_range_covers_whole_days() {
        let from = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let range = date_range(Some(from), Some(to), 30);
        assert_eq!(range.label(), "2024-03-01 to 2024-03-31");
        assert_eq!(range.days_inclusive(), 31);
        assert_eq!(range.to.format("%H:%M:%S").to_string(), "23:59:59");
    }

    #[test]
    fn test_open_start_counts_back_from_end() {
        let to = NaiveDate::from_ymd_opt(2024, 3, 31).unwrap();
        let range = date_range(None, Some(to), 7);
        assert_eq!(range.to - range.from, chrono::Duration::days(7));
    }

    #[tokio::test]
    async fn test_defaults_resolve_from_config() {
        let args = parse(&["--type", "security"]);
        let request = build_request(&args, &Config::default()).await.unwrap();
        assert_eq!(request.provider, "openai");
        assert_eq!(request.model, "gpt-4o-mini");
        assert_eq!(request.analysis_type, AnalysisType::Security);
        assert!(request.export.is_none());
        assert!(request.validate().is_ok());
    }

    #[tokio::test]
    async fn test_export_flags_build_options() {
        let args = parse(&["--provider", "anthropic", "--export", "csv", "--no-charts"]);
        let request = build_request(&args, &Config::default()).await.unwrap();
        assert_eq!(request.model, "claude-3-5-sonnet-latest");
        let export = request.export.unwrap();
        assert_eq!(export.format, ExportFormat::Csv);
        assert!(!export.include_charts);
        assert!(!export.include_raw_data);
    }

    #[tokio::test]
    async fn test_unknown_provider_needs_model() {
        let args = parse(&["--provider", "mistral"]);
        assert!(build_request(&args, &Config::default()).await.is_err());
    }
}

//! Command-line interface: clap definitions, output formatting and the
//! per-command handlers.

pub mod commands;
pub mod output;
pub mod runtime;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use uuid::Uuid;

use crate::domain::models::Config;
use crate::infrastructure::config::ConfigLoader;

pub use runtime::Runtime;

#[derive(Parser, Debug)]
#[command(name = "commitscope")]
#[command(about = "Commitscope - AI-assisted commit history analysis", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file used instead of .commitscope/config.yaml
    #[arg(short, long, global = true, env = "COMMITSCOPE_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize commitscope configuration and database
    Init(commands::init::InitArgs),
    /// Submit an analysis request
    Submit(commands::submit::SubmitArgs),
    /// Show progress of a task
    Status(commands::status::StatusArgs),
    /// Cancel a pending or running task
    Cancel(commands::cancel::CancelArgs),
    /// Show the result of a completed task
    Result(commands::result::ResultArgs),
    /// List tasks
    List(commands::list::ListArgs),
    /// Show provider attempts recorded for a task
    Attempts(commands::attempts::AttemptsArgs),
    /// Show usage statistics
    Stats(commands::stats::StatsArgs),
    /// Queue an export of a completed result
    Export(commands::export::ExportArgs),
    /// Run workers that process queued tasks
    Worker(commands::worker::WorkerArgs),
}

impl Cli {
    /// Configuration from `--config` if given, else the project layers.
    pub fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => ConfigLoader::load_from_file(path),
            None => ConfigLoader::load(),
        }
    }
}

/// Parse a task id argument.
pub fn parse_task_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| anyhow::anyhow!("Invalid task id '{}': expected a UUID", raw))
}

/// Print a command failure and exit non-zero.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let chain: Vec<String> = err.chain().skip(1).map(ToString::to_string).collect();
        let body = serde_json::json!({ "error": err.to_string(), "causes": chain });
        println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
    } else {
        eprintln!("Error: {:#}", err);
    }
    std::process::exit(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["commitscope", "list", "--json", "--config", "alt.yaml"]).unwrap();
        assert!(cli.json);
        assert_eq!(cli.config, Some(PathBuf::from("alt.yaml")));
        assert!(matches!(cli.command, Commands::List(_)));
    }

    #[test]
    fn test_parse_task_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_task_id(&format!(" {} ", id)).unwrap(), id);
        assert!(parse_task_id("not-a-uuid").is_err());
    }
}

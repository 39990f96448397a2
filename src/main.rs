//! Commitscope CLI entry point.

use anyhow::Result;
use clap::Parser;

use commitscope::cli::commands;
use commitscope::cli::{Cli, Commands, Runtime};
use commitscope::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json = cli.json;
    if let Err(err) = run(cli).await {
        commitscope::cli::handle_error(err, json);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.load_config()?;
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    let json = cli.json;
    if let Commands::Init(args) = cli.command {
        return commands::init::execute(args, json).await;
    }

    let runtime = Runtime::open(config).await?;
    match cli.command {
        Commands::Init(_) => Ok(()),
        Commands::Submit(args) => commands::submit::execute(args, &runtime, json).await,
        Commands::Status(args) => commands::status::execute(args, &runtime, json).await,
        Commands::Cancel(args) => commands::cancel::execute(args, &runtime, json).await,
        Commands::Result(args) => commands::result::execute(args, &runtime, json).await,
        Commands::List(args) => commands::list::execute(args, &runtime, json).await,
        Commands::Attempts(args) => commands::attempts::execute(args, &runtime, json).await,
        Commands::Stats(args) => commands::stats::execute(args, &runtime, json).await,
        Commands::Export(args) => commands::export::execute(args, &runtime, json).await,
        Commands::Worker(args) => commands::worker::execute(args, &runtime, json).await,
    }
}

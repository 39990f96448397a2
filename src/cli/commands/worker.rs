//! `commitscope worker`: drain the task queue until interrupted.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use crate::cli::output::{output, CommandOutput};
use crate::cli::Runtime;
use crate::services::WorkerPool;

#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Number of workers; defaults to engine.worker_count
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,

    /// Seconds to wait for running tasks after Ctrl-C
    #[arg(long, default_value = "30")]
    pub grace_secs: u64,

    /// Worker id prefix, useful when several processes share a database
    #[arg(long, default_value = "worker")]
    pub prefix: String,
}

#[derive(Debug, serde::Serialize)]
pub struct WorkerOutput {
    pub workers: usize,
    pub processed: u64,
    pub completed: u64,
    pub errors: u64,
}

impl CommandOutput for WorkerOutput {
    fn to_human(&self) -> String {
        format!(
            "Workers stopped.\n  Workers: {}\n  Processed: {}\n  Completed: {}\n  Errors: {}",
            self.workers, self.processed, self.completed, self.errors
        )
    }
}

pub async fn execute(args: WorkerArgs, runtime: &Runtime, json_mode: bool) -> Result<()> {
    let count = args.workers.unwrap_or(runtime.config.engine.worker_count).max(1);
    let providers = runtime.engine.gateway().registry().names();
    info!(workers = count, providers = ?providers, "starting workers; press Ctrl-C to stop");

    let pool = WorkerPool::spawn(runtime.engine.clone(), count, &args.prefix);
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    info!("interrupt received, shutting down");

    let status = pool.status_handle();
    pool.shutdown(Duration::from_secs(args.grace_secs)).await;

    for circuit in runtime.engine.gateway().breaker().stats().await {
        info!(
            provider = %circuit.provider,
            state = %circuit.state,
            failures = circuit.failure_count,
            "circuit state at shutdown"
        );
    }
    runtime.pool.close().await;

    output(
        &WorkerOutput {
            workers: count,
            processed: status.processed(),
            completed: status.completed(),
            errors: status.errors(),
        },
        json_mode,
    );
    Ok(())
}

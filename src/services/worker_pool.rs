//! Worker pool that drains the task queue.
//!
//! Each worker loops: dequeue a task id, drive it through the engine, repeat.
//! Cancelling the engine's shutdown token stops the loops and every running
//! pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::models::TaskStatus;
use crate::services::engine::AnalysisEngine;

/// Counters shared by all workers of a pool.
#[derive(Debug, Default)]
pub struct PoolStatus {
    processed: AtomicU64,
    completed: AtomicU64,
    errors: AtomicU64,
}

impl PoolStatus {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Acquire)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }
}

pub struct WorkerPool {
    engine: Arc<AnalysisEngine>,
    workers: Vec<JoinHandle<()>>,
    status: Arc<PoolStatus>,
}

impl WorkerPool {
    /// Spawn `count` workers, named `<prefix>-<n>`.
    pub fn spawn(engine: Arc<AnalysisEngine>, count: usize, prefix: &str) -> Self {
        let status = Arc::new(PoolStatus::default());
        let workers = (0..count.max(1))
            .map(|n| {
                let worker_id = format!("{}-{}", prefix, n);
                tokio::spawn(run_worker(engine.clone(), worker_id, status.clone()))
            })
            .collect();
        info!(workers = count.max(1), "worker pool started");
        Self { engine, workers, status }
    }

    pub fn status(&self) -> &PoolStatus {
        &self.status
    }

    /// Shared counters that outlive the pool.
    pub fn status_handle(&self) -> Arc<PoolStatus> {
        self.status.clone()
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stop the workers and wait up to `grace` for them to finish. Tasks
    /// still running are finalized by their worker before it exits.
    pub async fn shutdown(self, grace: Duration) {
        self.engine.shutdown_token().cancel();
        let join_all = futures::future::join_all(self.workers);
        if tokio::time::timeout(grace, join_all).await.is_err() {
            warn!(grace_secs = grace.as_secs(), "workers did not stop within grace period");
        }
        info!(
            processed = self.status.processed(),
            completed = self.status.completed(),
            "worker pool stopped"
        );
    }

    /// Run until the shutdown token fires, then wait for the workers.
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!(error = %e, "worker task panicked");
            }
        }
    }
}

async fn run_worker(engine: Arc<AnalysisEngine>, worker_id: String, status: Arc<PoolStatus>) {
    let shutdown = engine.shutdown_token();
    debug!(%worker_id, "worker started");

    loop {
        let next = match engine.queue().dequeue(&shutdown).await {
            Ok(Some(task_id)) => task_id,
            Ok(None) => break,
            Err(e) => {
                status.errors.fetch_add(1, Ordering::AcqRel);
                error!(%worker_id, error = %e, "dequeue failed");
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    () = tokio::time::sleep(Duration::from_secs(1)) => continue,
                }
            }
        };

        match engine.process(next, &worker_id).await {
            Ok(Some(final_status)) => {
                status.processed.fetch_add(1, Ordering::AcqRel);
                if final_status == TaskStatus::Completed {
                    status.completed.fetch_add(1, Ordering::AcqRel);
                }
                debug!(%worker_id, task_id = %next, status = %final_status, "task finished");
            }
            Ok(None) => debug!(%worker_id, task_id = %next, "task skipped"),
            Err(e) => {
                status.errors.fetch_add(1, Ordering::AcqRel);
                error!(%worker_id, task_id = %next, error = %e, "task processing failed");
            }
        }
    }

    debug!(%worker_id, "worker stopped");
}

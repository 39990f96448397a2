//! In-memory export render queue.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{ExportJob, ExportOptions};
use crate::domain::ports::ExportRenderQueue;

/// Export queue kept in memory. Can be switched to reject every enqueue.
pub struct InMemoryExportQueue {
    jobs: RwLock<Vec<ExportJob>>,
    retention_days: i64,
    unavailable: AtomicBool,
}

impl InMemoryExportQueue {
    pub fn new(retention_days: i64) -> Self {
        Self { jobs: RwLock::new(Vec::new()), retention_days, unavailable: AtomicBool::new(false) }
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Release);
    }

    pub async fn jobs(&self) -> Vec<ExportJob> {
        self.jobs.read().await.clone()
    }
}

impl Default for InMemoryExportQueue {
    fn default() -> Self {
        Self::new(7)
    }
}

#[async_trait]
impl ExportRenderQueue for InMemoryExportQueue {
    async fn enqueue(&self, task_id: Uuid, result_id: Uuid, options: ExportOptions) -> DomainResult<String> {
        if self.unavailable.load(Ordering::Acquire) {
            return Err(DomainError::QueueError("export queue unavailable".to_string()));
        }
        let job = ExportJob::new(task_id, result_id, options, self.retention_days);
        let job_ref = format!("export-{}", job.id);
        self.jobs.write().await.push(job);
        Ok(job_ref)
    }

    async fn list_for_task(&self, task_id: Uuid) -> DomainResult<Vec<ExportJob>> {
        let mut jobs: Vec<ExportJob> =
            self.jobs.read().await.iter().filter(|j| j.task_id == task_id).cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(jobs)
    }
}

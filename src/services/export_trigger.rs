//! Hands completed results to the export renderer.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisResult, AnalysisTask, ExportOptions, ExportRequestOutcome, TaskStatus};
use crate::domain::ports::{ExportRenderQueue, TaskStore};

#[derive(Clone)]
pub struct ExportTrigger {
    queue: Arc<dyn ExportRenderQueue>,
    store: Arc<dyn TaskStore>,
}

impl ExportTrigger {
    pub fn new(queue: Arc<dyn ExportRenderQueue>, store: Arc<dyn TaskStore>) -> Self {
        Self { queue, store }
    }

    /// Called once after a task's completed transition has been stored.
    /// Enqueue failures are logged and recorded on the task; the task stays
    /// completed.
    pub async fn on_completed(&self, task: &AnalysisTask, result: &AnalysisResult) -> Option<String> {
        let options = task.export?;
        match self.queue.enqueue(task.id, result.id, options).await {
            Ok(job_ref) => {
                info!(task_id = %task.id, %job_ref, format = options.format.as_str(), "export enqueued");
                Some(job_ref)
            }
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "export enqueue failed");
                let message = format!("export enqueue failed: {}", e);
                if let Err(store_err) = self.store.set_export_error(task.id, Some(&message)).await {
                    warn!(task_id = %task.id, error = %store_err, "failed to record export error");
                }
                None
            }
        }
    }

    /// On-demand export of a completed task.
    pub async fn request_export(&self, task_id: Uuid, options: ExportOptions) -> DomainResult<ExportRequestOutcome> {
        let Some(task) = self.store.get(task_id).await? else {
            return Ok(ExportRequestOutcome::NotFound);
        };
        if task.status != TaskStatus::Completed {
            return Ok(ExportRequestOutcome::NotReady { status: task.status });
        }
        let Some(result) = self.store.get_result(task_id).await? else {
            return Ok(ExportRequestOutcome::NotReady { status: task.status });
        };

        let job_ref = self.queue.enqueue(task_id, result.id, options).await?;
        if task.export_error.is_some() {
            self.store.set_export_error(task_id, None).await?;
        }
        info!(%task_id, %job_ref, "export requested");
        Ok(ExportRequestOutcome::Enqueued { job_ref })
    }
}

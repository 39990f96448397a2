use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{ExportJob, ExportOptions};

/// Queue consumed by the export renderer.
#[async_trait]
pub trait ExportRenderQueue: Send + Sync {
    /// Enqueue a render job for a stored result and return its job reference.
    async fn enqueue(&self, task_id: Uuid, result_id: Uuid, options: ExportOptions) -> DomainResult<String>;

    /// Jobs enqueued for a task, newest first.
    async fn list_for_task(&self, task_id: Uuid) -> DomainResult<Vec<ExportJob>>;
}

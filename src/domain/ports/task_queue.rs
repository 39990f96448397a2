use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::domain::errors::DomainResult;

/// Shared queue of task ids awaiting a worker.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueue a task id and return the external job reference.
    async fn enqueue(&self, task_id: Uuid) -> DomainResult<String>;

    /// Wait for the next task id. Returns `None` once `shutdown` fires.
    async fn dequeue(&self, shutdown: &CancellationToken) -> DomainResult<Option<Uuid>>;
}

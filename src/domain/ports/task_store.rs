//! Task store port.
//!
//! Every status-changing operation is a conditional update: it reports
//! `false` instead of failing when the task is not in the expected state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AnalysisResult, AnalysisTask, ProviderAttempt, TaskFailure, TaskStatus};

/// Filters for querying tasks
#[derive(Default, Debug, Clone)]
pub struct TaskFilter {
    pub user_id: Option<String>,
    /// Match any of these statuses; empty matches every status.
    pub statuses: Vec<TaskStatus>,
    pub created_after: Option<DateTime<Utc>>,
    /// Order by creation time ascending instead of descending.
    pub oldest_first: bool,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self { user_id: Some(user_id.into()), ..Default::default() }
    }

    pub fn with_statuses(mut self, statuses: &[TaskStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn created_after(mut self, at: DateTime<Utc>) -> Self {
        self.created_after = Some(at);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a task satisfies this filter, ignoring ordering and limit.
    pub fn matches(&self, task: &AnalysisTask) -> bool {
        if let Some(user) = &self.user_id {
            if &task.user_id != user {
                return false;
            }
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&task.status) {
            return false;
        }
        if let Some(after) = self.created_after {
            if task.created_at < after {
                return false;
            }
        }
        true
    }
}

/// Durable storage for tasks, attempts and results.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task
    async fn create(&self, task: &AnalysisTask) -> DomainResult<()>;

    async fn get(&self, id: Uuid) -> DomainResult<Option<AnalysisTask>>;

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<AnalysisTask>>;

    /// `pending -> running`. Sets `started_at`, progress 0 and the worker id.
    async fn claim(&self, id: Uuid, worker_id: &str) -> DomainResult<bool>;

    /// Write progress only while running and only forwards.
    async fn update_progress(&self, id: Uuid, progress: u8, step: &str) -> DomainResult<bool>;

    /// Raise the cancel flag on a running task.
    async fn request_cancel(&self, id: Uuid) -> DomainResult<bool>;

    /// Move a task from any of `from` into `to`. A failure is recorded when
    /// given; terminal targets stamp `completed_at`.
    async fn transition(
        &self,
        id: Uuid,
        from: &[TaskStatus],
        to: TaskStatus,
        failure: Option<&TaskFailure>,
    ) -> DomainResult<bool>;

    /// Store the result and mark the task completed in one step, only if it
    /// is still running and no cancellation was requested.
    async fn complete_with_result(&self, id: Uuid, result: &AnalysisResult) -> DomainResult<bool>;

    async fn append_attempt(&self, attempt: &ProviderAttempt) -> DomainResult<()>;

    /// Attempts for a task ordered by attempt index.
    async fn list_attempts(&self, task_id: Uuid) -> DomainResult<Vec<ProviderAttempt>>;

    async fn get_result(&self, task_id: Uuid) -> DomainResult<Option<AnalysisResult>>;

    async fn set_queue_ref(&self, id: Uuid, queue_ref: &str) -> DomainResult<()>;

    async fn set_export_error(&self, id: Uuid, error: Option<&str>) -> DomainResult<()>;

    /// Add tokens and cost onto the task's running totals.
    async fn add_usage(&self, id: Uuid, tokens: u64, cost_usd: f64) -> DomainResult<()>;
}

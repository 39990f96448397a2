//! Task lifecycle transitions.
//!
//! All status changes go through here. Each one is a conditional update on
//! the store, so a transition either happens exactly once or reports that
//! the task was no longer in the expected state. Terminal transitions that
//! succeed release the task's admission slot.
//!
//! Terminal writes are retried with exponential backoff when the store
//! errors. If every attempt fails the slot is released anyway and the row is
//! left for [`TaskStateMachine::sweep_stale`] to fail on a later start.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AnalysisResult, AnalysisTask, FailureKind, TaskFailure, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskStore};
use crate::services::admission::AdmissionController;

/// Progress checkpoints reported while a task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Milestone {
    FetchingCommits,
    CommitsFetched,
    RunningAnalysis,
    AssemblingResult,
}

impl Milestone {
    pub fn progress(&self) -> u8 {
        match self {
            Self::FetchingCommits => 10,
            Self::CommitsFetched => 40,
            Self::RunningAnalysis => 70,
            Self::AssemblingResult => 90,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::FetchingCommits => "Fetching commits",
            Self::CommitsFetched => "Commits fetched",
            Self::RunningAnalysis => "Running AI analysis",
            Self::AssemblingResult => "Assembling result",
        }
    }
}

pub const COMPLETED_STEP: &str = "Completed";

/// Step label written when a task enters a terminal status.
pub fn terminal_step(status: TaskStatus) -> Option<&'static str> {
    match status {
        TaskStatus::Completed => Some(COMPLETED_STEP),
        TaskStatus::Failed => Some("Failed"),
        TaskStatus::Cancelled => Some("Cancelled"),
        TaskStatus::Pending | TaskStatus::Running => None,
    }
}

/// Bounds on retrying a terminal write.
#[derive(Debug, Clone)]
struct TerminalRetry {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
}

impl Default for TerminalRetry {
    fn default() -> Self {
        Self { max_attempts: 4, initial_delay: Duration::from_millis(50), max_delay: Duration::from_secs(2) }
    }
}

impl TerminalRetry {
    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_max_interval(self.max_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// What to do with the slot when a write still fails after every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnExhausted {
    ReleaseSlot,
    KeepSlot,
}

#[derive(Clone)]
pub struct TaskStateMachine {
    store: Arc<dyn TaskStore>,
    admission: Arc<AdmissionController>,
    retry: TerminalRetry,
}

impl TaskStateMachine {
    pub fn new(store: Arc<dyn TaskStore>, admission: Arc<AdmissionController>) -> Self {
        Self { store, admission, retry: TerminalRetry::default() }
    }

    /// Run a store operation for `task_id`, retrying errors with backoff.
    async fn retrying<T, F, Fut>(&self, task_id: Uuid, operation: &'static str, op: F) -> DomainResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let mut backoff = self.retry.backoff();
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = backoff.next_backoff().unwrap_or(self.retry.max_delay);
                    warn!(%task_id, operation, attempt, error = %e, ?delay, "store operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Terminal write with retries. When every attempt fails the slot is
    /// optionally released before the error is returned.
    async fn write_terminal<F, Fut>(
        &self,
        task: &AnalysisTask,
        target: TaskStatus,
        on_exhausted: OnExhausted,
        write: F,
    ) -> DomainResult<bool>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = DomainResult<bool>>,
    {
        match self.retrying(task.id, target.as_str(), write).await {
            Ok(done) => Ok(done),
            Err(e) => {
                let released =
                    on_exhausted == OnExhausted::ReleaseSlot && self.admission.release(&task.user_id, task.id);
                error!(
                    task_id = %task.id,
                    user = %task.user_id,
                    target = target.as_str(),
                    error = %e,
                    slot_released = released,
                    "terminal transition abandoned"
                );
                Err(e)
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// `pending -> running` for exactly one worker.
    pub async fn claim(&self, task_id: Uuid, worker_id: &str) -> DomainResult<bool> {
        let claimed = self.store.claim(task_id, worker_id).await?;
        if claimed {
            info!(%task_id, worker_id, "task claimed");
        } else {
            debug!(%task_id, worker_id, "task not claimable");
        }
        Ok(claimed)
    }

    /// Record a milestone. Ignored once the task has left `running`.
    pub async fn advance(&self, task_id: Uuid, milestone: Milestone) -> DomainResult<bool> {
        let written = self.store.update_progress(task_id, milestone.progress(), milestone.label()).await?;
        if written {
            debug!(%task_id, progress = milestone.progress(), step = milestone.label(), "progress updated");
        }
        Ok(written)
    }

    /// `running -> completed` together with the result.
    pub async fn complete(&self, task: &AnalysisTask, result: &AnalysisResult) -> DomainResult<bool> {
        let done = self
            .write_terminal(task, TaskStatus::Completed, OnExhausted::ReleaseSlot, || {
                self.store.complete_with_result(task.id, result)
            })
            .await?;
        if done {
            self.admission.release(&task.user_id, task.id);
            info!(task_id = %task.id, result_id = %result.id, "task completed");
        }
        Ok(done)
    }

    /// `running -> failed` with a recorded kind and message.
    pub async fn fail(&self, task: &AnalysisTask, failure: &TaskFailure) -> DomainResult<bool> {
        let done = self
            .write_terminal(task, TaskStatus::Failed, OnExhausted::ReleaseSlot, || {
                self.store.transition(task.id, &[TaskStatus::Running], TaskStatus::Failed, Some(failure))
            })
            .await?;
        if done {
            self.admission.release(&task.user_id, task.id);
            warn!(
                task_id = %task.id,
                kind = failure.kind.as_str(),
                error = %failure.message,
                "task failed"
            );
        }
        Ok(done)
    }

    /// `pending -> failed` for a task that could not be queued.
    pub async fn abandon(&self, task: &AnalysisTask, failure: &TaskFailure) -> DomainResult<bool> {
        let done = self
            .write_terminal(task, TaskStatus::Failed, OnExhausted::ReleaseSlot, || {
                self.store.transition(task.id, &[TaskStatus::Pending], TaskStatus::Failed, Some(failure))
            })
            .await?;
        if done {
            self.admission.release(&task.user_id, task.id);
            warn!(task_id = %task.id, error = %failure.message, "task abandoned before start");
        }
        Ok(done)
    }

    /// `pending -> cancelled`.
    pub async fn cancel_pending(&self, task: &AnalysisTask) -> DomainResult<bool> {
        let done = self
            .write_terminal(task, TaskStatus::Cancelled, OnExhausted::KeepSlot, || {
                self.store.transition(task.id, &[TaskStatus::Pending], TaskStatus::Cancelled, None)
            })
            .await?;
        if done {
            self.admission.release(&task.user_id, task.id);
            info!(task_id = %task.id, "pending task cancelled");
        }
        Ok(done)
    }

    /// `running -> cancelled`, performed by the worker that owns the task.
    pub async fn finalize_cancelled(&self, task: &AnalysisTask) -> DomainResult<bool> {
        let done = self
            .write_terminal(task, TaskStatus::Cancelled, OnExhausted::ReleaseSlot, || {
                self.store.transition(task.id, &[TaskStatus::Running], TaskStatus::Cancelled, None)
            })
            .await?;
        if done {
            self.admission.release(&task.user_id, task.id);
            info!(task_id = %task.id, "running task cancelled");
        }
        Ok(done)
    }

    /// Fail a claimed task whose pipeline stopped on a store error. The
    /// slot is released even when the task cannot be read back.
    pub async fn abort(&self, task_id: Uuid, failure: &TaskFailure) -> DomainResult<bool> {
        let task = match self.retrying(task_id, "load", || self.store.get(task_id)).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                self.admission.release_task(task_id);
                return Err(DomainError::TaskNotFound(task_id));
            }
            Err(e) => {
                let released = self.admission.release_task(task_id);
                error!(%task_id, error = %e, slot_released = released, "could not load task to abort it");
                return Err(e);
            }
        };
        self.fail(&task, failure).await
    }

    /// Fail `running` tasks started more than `older_than` ago. Such rows
    /// belong to workers that died before reaching a terminal status.
    pub async fn sweep_stale(&self, older_than: Duration) -> DomainResult<usize> {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| Utc::now().checked_sub_signed(age))
        else {
            return Ok(0);
        };
        let running = self.store.list(TaskFilter::default().with_statuses(&[TaskStatus::Running])).await?;
        let failure = TaskFailure::new(FailureKind::Internal, "worker stopped before the task finished");

        let mut swept = 0;
        for task in running.iter().filter(|t| t.started_at.is_none_or(|at| at < cutoff)) {
            if self.fail(task, &failure).await? {
                swept += 1;
            }
        }
        if swept > 0 {
            warn!(swept, "stale running tasks failed");
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryTaskStore;
    use crate::domain::models::{AnalysisRequest, AnalysisType, DateRange, GenerationParams};
    use crate::services::admission::AdmissionPolicy;

    fn new_task(user: &str) -> AnalysisTask {
        AnalysisTask::from_request(
            Uuid::new_v4(),
            AnalysisRequest {
                user_id: user.to_string(),
                repository: "octo/widgets".to_string(),
                developer_filter: None,
                analysis_type: AnalysisType::Performance,
                date_range: DateRange::last_days(14),
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                params: GenerationParams::default(),
                prompt_template: None,
                export: None,
            },
        )
    }

    async fn running_task(machine: &TaskStateMachine, admission: &AdmissionController) -> AnalysisTask {
        let task = new_task("alice");
        assert!(admission.try_admit("alice", task.id, 1).is_admitted());
        machine.store().create(&task).await.unwrap();
        assert!(machine.claim(task.id, "w1").await.unwrap());
        task
    }

    fn machine() -> (TaskStateMachine, Arc<AdmissionController>) {
        let admission = Arc::new(AdmissionController::new(AdmissionPolicy::default()));
        let store: Arc<dyn TaskStore> = Arc::new(InMemoryTaskStore::new());
        (TaskStateMachine::new(store, admission.clone()), admission)
    }

    #[tokio::test]
    async fn test_sweep_fails_stale_running_tasks() {
        let (machine, admission) = machine();
        let task = running_task(&machine, &admission).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // A recent start is left alone.
        assert_eq!(machine.sweep_stale(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(admission.snapshot("alice").slots_held, 1);

        assert_eq!(machine.sweep_stale(Duration::ZERO).await.unwrap(), 1);
        let stored = machine.store().get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.error_kind, Some(FailureKind::Internal));
        assert_eq!(admission.snapshot("alice").slots_held, 0);

        // Already terminal: nothing left to sweep.
        assert_eq!(machine.sweep_stale(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_abort_fails_claimed_task_once() {
        let (machine, admission) = machine();
        let task = running_task(&machine, &admission).await;
        let failure = TaskFailure::new(FailureKind::Internal, "Database error: disk I/O error");

        assert!(machine.abort(task.id, &failure).await.unwrap());
        assert!(!machine.abort(task.id, &failure).await.unwrap());
        let stored = machine.store().get(task.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(admission.snapshot("alice").slots_held, 0);
    }

    #[tokio::test]
    async fn test_abort_unknown_task_releases_slot() {
        let (machine, admission) = machine();
        let ghost = Uuid::new_v4();
        assert!(admission.try_admit("bob", ghost, 1).is_admitted());
        let failure = TaskFailure::new(FailureKind::Internal, "gone");

        let err = machine.abort(ghost, &failure).await.unwrap_err();
        assert!(matches!(err, DomainError::TaskNotFound(id) if id == ghost));
        assert_eq!(admission.snapshot("bob").slots_held, 0);
    }

    #[test]
    fn test_milestones_progress_forward() {
        let order = [
            Milestone::FetchingCommits,
            Milestone::CommitsFetched,
            Milestone::RunningAnalysis,
            Milestone::AssemblingResult,
        ];
        assert!(order.windows(2).all(|w| w[0].progress() < w[1].progress()));
        assert_eq!(terminal_step(TaskStatus::Running), None);
    }
}

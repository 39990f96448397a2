//! In-memory task store with the same conditional-update semantics as the
//! SQLite store. Used by tests and single-process runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{AnalysisResult, AnalysisTask, ProviderAttempt, TaskFailure, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskStore};
use crate::services::state_machine::{terminal_step, COMPLETED_STEP};

#[derive(Default)]
struct State {
    tasks: HashMap<Uuid, AnalysisTask>,
    attempts: HashMap<Uuid, Vec<ProviderAttempt>>,
    results: HashMap<Uuid, AnalysisResult>,
}

/// Task store held in memory. Every conditional update checks and writes
/// under one write lock.
#[derive(Default)]
pub struct InMemoryTaskStore {
    state: RwLock<State>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create(&self, task: &AnalysisTask) -> DomainResult<()> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.id) {
            return Err(DomainError::ValidationFailed(format!("task {} already exists", task.id)));
        }
        state.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<AnalysisTask>> {
        Ok(self.state.read().await.tasks.get(&id).cloned())
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<AnalysisTask>> {
        let state = self.state.read().await;
        let mut tasks: Vec<AnalysisTask> = state.tasks.values().filter(|t| filter.matches(t)).cloned().collect();
        if filter.oldest_first {
            tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        } else {
            tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        if let Some(limit) = filter.limit {
            tasks.truncate(limit);
        }
        Ok(tasks)
    }

    async fn claim(&self, id: Uuid, worker_id: &str) -> DomainResult<bool> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Pending => {
                task.status = TaskStatus::Running;
                task.worker_id = Some(worker_id.to_string());
                task.started_at = Some(Utc::now());
                task.progress = 0;
                task.current_step = "Starting".to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(&self, id: Uuid, progress: u8, step: &str) -> DomainResult<bool> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running => {
                task.progress = task.progress.max(progress.min(100));
                task.current_step = step.to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn request_cancel(&self, id: Uuid) -> DomainResult<bool> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running => {
                task.cancel_requested = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[TaskStatus],
        to: TaskStatus,
        failure: Option<&TaskFailure>,
    ) -> DomainResult<bool> {
        let mut state = self.state.write().await;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(false);
        };
        if !from.contains(&task.status) || !task.status.can_transition_to(to) {
            return Ok(false);
        }
        task.status = to;
        if let Some(step) = terminal_step(to) {
            task.current_step = step.to_string();
        }
        if to.is_terminal() {
            task.completed_at = Some(Utc::now());
        }
        if let Some(failure) = failure {
            task.error_kind = Some(failure.kind);
            task.error_message = Some(failure.message.clone());
        }
        Ok(true)
    }

    async fn complete_with_result(&self, id: Uuid, result: &AnalysisResult) -> DomainResult<bool> {
        let mut state = self.state.write().await;
        match state.tasks.get_mut(&id) {
            Some(task) if task.status == TaskStatus::Running && !task.cancel_requested => {
                task.status = TaskStatus::Completed;
                task.progress = 100;
                task.current_step = COMPLETED_STEP.to_string();
                task.completed_at = Some(Utc::now());
            }
            _ => return Ok(false),
        }
        state.results.insert(id, result.clone());
        Ok(true)
    }

    async fn append_attempt(&self, attempt: &ProviderAttempt) -> DomainResult<()> {
        let mut state = self.state.write().await;
        state.attempts.entry(attempt.task_id).or_default().push(attempt.clone());
        Ok(())
    }

    async fn list_attempts(&self, task_id: Uuid) -> DomainResult<Vec<ProviderAttempt>> {
        let state = self.state.read().await;
        let mut attempts = state.attempts.get(&task_id).cloned().unwrap_or_default();
        attempts.sort_by_key(|a| a.attempt_index);
        Ok(attempts)
    }

    async fn get_result(&self, task_id: Uuid) -> DomainResult<Option<AnalysisResult>> {
        Ok(self.state.read().await.results.get(&task_id).cloned())
    }

    async fn set_queue_ref(&self, id: Uuid, queue_ref: &str) -> DomainResult<()> {
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&id).ok_or(DomainError::TaskNotFound(id))?;
        task.queue_ref = Some(queue_ref.to_string());
        Ok(())
    }

    async fn set_export_error(&self, id: Uuid, error: Option<&str>) -> DomainResult<()> {
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&id).ok_or(DomainError::TaskNotFound(id))?;
        task.export_error = error.map(ToString::to_string);
        Ok(())
    }

    async fn add_usage(&self, id: Uuid, tokens: u64, cost_usd: f64) -> DomainResult<()> {
        let mut state = self.state.write().await;
        let task = state.tasks.get_mut(&id).ok_or(DomainError::TaskNotFound(id))?;
        task.tokens_used += tokens;
        task.cost_usd += cost_usd;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AnalysisRequest, AnalysisType, DateRange, FailureKind, GenerationParams};

    fn task() -> AnalysisTask {
        AnalysisTask::from_request(
            Uuid::new_v4(),
            AnalysisRequest {
                user_id: "alice".to_string(),
                repository: "octo/widgets".to_string(),
                developer_filter: None,
                analysis_type: AnalysisType::Comprehensive,
                date_range: DateRange::last_days(30),
                provider: "openai".to_string(),
                model: "gpt-4o-mini".to_string(),
                params: GenerationParams::default(),
                prompt_template: None,
                export: None,
            },
        )
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let store = InMemoryTaskStore::new();
        let t = task();
        store.create(&t).await.unwrap();

        assert!(store.claim(t.id, "w1").await.unwrap());
        assert!(!store.claim(t.id, "w2").await.unwrap());

        let stored = store.get(t.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Running);
        assert_eq!(stored.worker_id.as_deref(), Some("w1"));
        assert!(stored.started_at.is_some());
    }

    #[tokio::test]
    async fn test_progress_only_moves_forward_while_running() {
        let store = InMemoryTaskStore::new();
        let t = task();
        store.create(&t).await.unwrap();
        assert!(!store.update_progress(t.id, 10, "Fetching commits").await.unwrap());

        store.claim(t.id, "w1").await.unwrap();
        store.update_progress(t.id, 40, "Commits fetched").await.unwrap();
        store.update_progress(t.id, 10, "late").await.unwrap();
        assert_eq!(store.get(t.id).await.unwrap().unwrap().progress, 40);
    }

    #[tokio::test]
    async fn test_terminal_states_are_sticky() {
        let store = InMemoryTaskStore::new();
        let t = task();
        store.create(&t).await.unwrap();
        store.claim(t.id, "w1").await.unwrap();

        let failure = TaskFailure::new(FailureKind::DataFetch, "boom");
        assert!(store
            .transition(t.id, &[TaskStatus::Running], TaskStatus::Failed, Some(&failure))
            .await
            .unwrap());
        assert!(!store
            .transition(t.id, &[TaskStatus::Running], TaskStatus::Cancelled, None)
            .await
            .unwrap());

        let stored = store.get(t.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Failed);
        assert_eq!(stored.error_kind, Some(FailureKind::DataFetch));
        assert!(stored.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_list_orders_and_limits() {
        let store = InMemoryTaskStore::new();
        let mut ids = Vec::new();
        for i in 0..3 {
            let mut t = task();
            t.created_at = Utc::now() - chrono::Duration::minutes(10 - i);
            ids.push(t.id);
            store.create(&t).await.unwrap();
        }

        let newest = store.list(TaskFilter::for_user("alice").limit(2)).await.unwrap();
        assert_eq!(newest.iter().map(|t| t.id).collect::<Vec<_>>(), vec![ids[2], ids[1]]);

        let mut oldest = TaskFilter::default();
        oldest.oldest_first = true;
        assert_eq!(store.list(oldest).await.unwrap()[0].id, ids[0]);
        assert!(store.list(TaskFilter::for_user("bob")).await.unwrap().is_empty());
    }
}

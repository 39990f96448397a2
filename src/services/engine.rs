//! Analysis engine facade and task pipeline.
//!
//! The engine is what the API layer talks to: submit, status, cancel,
//! result and export. Workers call [`AnalysisEngine::process`] for each
//! task id they dequeue.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{
    DomainError, DomainResult, GatewayError, SubmitError,
};
use crate::domain::models::{
    AnalysisRequest, AnalysisResult, AnalysisTask, AttemptOutcome, CommitRecord, Config,
    EngineStats, ExportOptions, ExportRequestOutcome, FailureKind, PromptContext, ProviderAttempt,
    ProviderUsage, ResultLookup, TaskFailure, TaskStatus, TaskStatusView,
};
use crate::domain::models::prompt::build_prompt;
use crate::domain::ports::{CommitFetcher, ExportRenderQueue, TaskFilter, TaskQueue, TaskStore};
use crate::services::admission::{AdmissionController, AdmissionDecision, AdmissionPolicy};
use crate::services::cancellation::{CancelCause, CancellationRegistry};
use crate::services::export_trigger::ExportTrigger;
use crate::services::metrics::compute_stats;
use crate::services::provider_gateway::ProviderGateway;
use crate::services::result_assembler::{assemble, ProviderOutput};
use crate::services::state_machine::{Milestone, TaskStateMachine};

/// Slack past the task time limit before a `running` row counts as stale.
const STALE_GRACE: Duration = Duration::from_secs(60);

/// Timing and sizing knobs for the pipeline.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub task_time_limit: Duration,
    pub fetch_timeout: Duration,
    pub cancel_poll_interval: Duration,
    pub prompt_commit_limit: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for EngineSettings {
    fn from(config: &Config) -> Self {
        Self {
            task_time_limit: Duration::from_secs(config.engine.task_time_limit_secs),
            fetch_timeout: Duration::from_secs(config.data_fetch.timeout_secs),
            cancel_poll_interval: Duration::from_millis(config.engine.cancel_poll_interval_ms),
            prompt_commit_limit: config.engine.prompt_commit_limit,
        }
    }
}

/// Collaborators the engine is assembled from.
pub struct EngineComponents {
    pub store: Arc<dyn TaskStore>,
    pub queue: Arc<dyn TaskQueue>,
    pub fetcher: Arc<dyn CommitFetcher>,
    pub gateway: ProviderGateway,
    pub export_queue: Arc<dyn ExportRenderQueue>,
    pub admission: AdmissionPolicy,
}

/// Answer to `Cancel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// Cancellation recorded; a pending task is already cancelled, a running
    /// one stops at its next suspension point.
    Ack,
    AlreadyTerminal,
    TaskNotFound,
}

enum PipelineOutcome {
    Completed(AnalysisResult),
    Failed(TaskFailure),
    Cancelled,
}

pub struct AnalysisEngine {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn TaskQueue>,
    fetcher: Arc<dyn CommitFetcher>,
    gateway: ProviderGateway,
    admission: Arc<AdmissionController>,
    state: TaskStateMachine,
    cancellations: CancellationRegistry,
    exports: ExportTrigger,
    settings: EngineSettings,
}

impl AnalysisEngine {
    pub fn new(components: EngineComponents, settings: EngineSettings) -> Self {
        let store = components.store;
        let admission = Arc::new(AdmissionController::new(components.admission));
        Self {
            queue: components.queue,
            fetcher: components.fetcher,
            gateway: components.gateway.with_attempt_store(store.clone()),
            state: TaskStateMachine::new(store.clone(), admission.clone()),
            exports: ExportTrigger::new(components.export_queue, store.clone()),
            cancellations: CancellationRegistry::new(),
            admission,
            settings,
            store,
        }
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    pub fn gateway(&self) -> &ProviderGateway {
        &self.gateway
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Token that stops workers and every running pipeline when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancellations.root().clone()
    }

    /// Startup recovery: fail `running` rows whose worker is gone, then
    /// rebuild admission state. Returns the number of tasks failed.
    pub async fn recover(&self) -> DomainResult<usize> {
        let swept = self.state.sweep_stale(self.settings.task_time_limit + STALE_GRACE).await?;
        self.rebuild_admission().await?;
        Ok(swept)
    }

    /// Reconstruct admission state from the store after a restart.
    pub async fn rebuild_admission(&self) -> DomainResult<()> {
        let active = self
            .store
            .list(TaskFilter::default().with_statuses(&[TaskStatus::Pending, TaskStatus::Running]))
            .await?;
        let since = Utc::now() - self.admission.policy().window;
        let recent = self.store.list(TaskFilter::default().created_after(since)).await?;
        self.admission.rebuild(&active, &recent);
        Ok(())
    }

    /// Validate, admit, persist and enqueue a new analysis.
    #[instrument(skip(self, request), fields(user = %request.user_id, repository = %request.repository))]
    pub async fn submit(&self, request: AnalysisRequest) -> Result<Uuid, SubmitError> {
        request.validate().map_err(SubmitError::Invalid)?;

        let task_id = Uuid::new_v4();
        let user = request.user_id.clone();
        if let AdmissionDecision::Rejected(reason) = self.admission.try_admit(&user, task_id, 1) {
            return Err(SubmitError::Rejected(reason));
        }

        let task = AnalysisTask::from_request(task_id, request);
        if let Err(e) = self.store.create(&task).await {
            self.admission.rollback(&user, task_id);
            error!(%task_id, error = %e, "failed to create task");
            return Err(SubmitError::Internal(e));
        }

        match self.queue.enqueue(task_id).await {
            Ok(job_ref) => {
                if let Err(e) = self.store.set_queue_ref(task_id, &job_ref).await {
                    warn!(%task_id, error = %e, "failed to record queue reference");
                }
                info!(%task_id, %job_ref, "analysis task submitted");
                Ok(task_id)
            }
            Err(e) => {
                let failure = TaskFailure::new(FailureKind::Internal, format!("enqueue failed: {}", e));
                // A failed abandon has already given the slot back.
                if let Err(abandon_err) = self.state.abandon(&task, &failure).await {
                    error!(%task_id, error = %abandon_err, "failed to mark unqueued task as failed");
                }
                Err(SubmitError::Internal(e))
            }
        }
    }

    pub async fn get_status(&self, task_id: Uuid) -> DomainResult<TaskStatusView> {
        self.store
            .get(task_id)
            .await?
            .map(|t| t.status_view())
            .ok_or(DomainError::TaskNotFound(task_id))
    }

    pub async fn get_task(&self, task_id: Uuid) -> DomainResult<Option<AnalysisTask>> {
        self.store.get(task_id).await
    }

    /// Request cancellation of a task.
    #[instrument(skip(self))]
    pub async fn cancel(&self, task_id: Uuid) -> DomainResult<CancelOutcome> {
        // A pending task may be claimed between the read and the update, so
        // re-read and retry once the status has moved.
        for _ in 0..3 {
            let Some(task) = self.store.get(task_id).await? else {
                return Ok(CancelOutcome::TaskNotFound);
            };
            match task.status {
                TaskStatus::Pending => {
                    if self.state.cancel_pending(&task).await? {
                        return Ok(CancelOutcome::Ack);
                    }
                }
                TaskStatus::Running => {
                    if self.store.request_cancel(task_id).await? {
                        self.cancellations.cancel(task_id, CancelCause::Requested);
                        info!(%task_id, "cancellation requested for running task");
                        return Ok(CancelOutcome::Ack);
                    }
                }
                _ => return Ok(CancelOutcome::AlreadyTerminal),
            }
        }
        match self.store.get(task_id).await? {
            Some(task) if task.is_terminal() => Ok(CancelOutcome::AlreadyTerminal),
            Some(_) => Err(DomainError::InvalidStateTransition {
                from: TaskStatus::Running,
                to: TaskStatus::Cancelled,
                reason: "task status kept changing during cancellation".to_string(),
            }),
            None => Ok(CancelOutcome::TaskNotFound),
        }
    }

    pub async fn get_result(&self, task_id: Uuid) -> DomainResult<ResultLookup> {
        let Some(task) = self.store.get(task_id).await? else {
            return Ok(ResultLookup::NotFound);
        };
        if task.status != TaskStatus::Completed {
            return Ok(ResultLookup::NotReady { status: task.status });
        }
        match self.store.get_result(task_id).await? {
            Some(result) => Ok(ResultLookup::Ready { result: Box::new(result) }),
            None => Err(DomainError::ResultNotFound(task_id)),
        }
    }

    pub async fn request_export(&self, task_id: Uuid, options: ExportOptions) -> DomainResult<ExportRequestOutcome> {
        self.exports.request_export(task_id, options).await
    }

    pub async fn list_tasks(&self, filter: TaskFilter) -> DomainResult<Vec<AnalysisTask>> {
        self.store.list(filter).await
    }

    pub async fn list_attempts(&self, task_id: Uuid) -> DomainResult<Vec<ProviderAttempt>> {
        self.store.list_attempts(task_id).await
    }

    /// Usage statistics over the last `days` days, optionally for one user.
    pub async fn stats(&self, user: Option<&str>, days: i64) -> DomainResult<EngineStats> {
        let mut filter = TaskFilter::default().created_after(Utc::now() - chrono::Duration::days(days));
        filter.user_id = user.map(ToString::to_string);
        let tasks = self.store.list(filter).await?;

        let mut stats = EngineStats { period_days: days, total_tasks: tasks.len() as u64, ..Default::default() };
        let mut durations = Vec::new();
        let mut repos: HashMap<&str, u64> = HashMap::new();
        let mut providers: BTreeMap<String, ProviderUsage> = BTreeMap::new();

        for task in &tasks {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
            stats.total_tokens += task.tokens_used;
            stats.total_cost_usd += task.cost_usd;
            if task.status == TaskStatus::Completed {
                if let Some(d) = task.duration() {
                    durations.push(d.num_milliseconds() as f64 / 1000.0);
                }
            }
            *repos.entry(task.repository.as_str()).or_default() += 1;

            for attempt in self.store.list_attempts(task.id).await? {
                let usage = providers.entry(attempt.provider.clone()).or_insert_with(|| ProviderUsage {
                    provider: attempt.provider.clone(),
                    ..Default::default()
                });
                usage.attempts += 1;
                if attempt.outcome != AttemptOutcome::Success {
                    usage.failures += 1;
                }
                usage.tokens += attempt.tokens_used.unwrap_or(0);
                usage.cost_usd += attempt.cost_usd;
            }
        }

        if !durations.is_empty() {
            stats.avg_duration_secs = Some(durations.iter().sum::<f64>() / durations.len() as f64);
        }
        stats.most_analyzed_repository = repos
            .into_iter()
            .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(repo, _)| repo.to_string());
        stats.providers = providers.into_values().collect();
        Ok(stats)
    }

    /// Drive one task from `pending` to a terminal status. Returns the final
    /// status, or `None` when another worker owns the task.
    #[instrument(skip(self), fields(worker_id = %worker_id))]
    pub async fn process(&self, task_id: Uuid, worker_id: &str) -> DomainResult<Option<TaskStatus>> {
        if !self.state.claim(task_id, worker_id).await? {
            return Ok(None);
        }

        let token = self.cancellations.register(task_id);
        let watcher = self.cancellations.spawn_flag_watcher(
            self.store.clone(),
            task_id,
            self.settings.cancel_poll_interval,
        );

        let final_status = self.drive(task_id, &token).await;

        if let Some(handle) = watcher {
            handle.abort();
        }
        self.cancellations.unregister(task_id);

        match final_status {
            Ok(status) => Ok(Some(status)),
            Err(e) => {
                error!(%task_id, error = %e, "pipeline stopped on a store error");
                let failure = TaskFailure::new(FailureKind::Internal, e.to_string());
                if self.state.abort(task_id, &failure).await? {
                    return Ok(Some(TaskStatus::Failed));
                }
                self.current_status(task_id).await.map(Some)
            }
        }
    }

    async fn drive(&self, task_id: Uuid, token: &CancellationToken) -> DomainResult<TaskStatus> {
        let task = self.store.get(task_id).await?.ok_or(DomainError::TaskNotFound(task_id))?;
        if task.cancel_requested {
            self.cancellations.cancel(task_id, CancelCause::Requested);
        }

        let limit = self.settings.task_time_limit;
        let outcome = tokio::select! {
            biased;
            () = token.cancelled() => PipelineOutcome::Cancelled,
            run = tokio::time::timeout(limit, self.run_pipeline(&task, token)) => match run {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(e)) => PipelineOutcome::Failed(TaskFailure::new(FailureKind::Internal, e.to_string())),
                Err(_) => PipelineOutcome::Failed(TaskFailure::new(
                    FailureKind::Timeout,
                    format!("task exceeded time limit of {}s", limit.as_secs()),
                )),
            },
        };

        self.finish(&task, outcome).await
    }

    async fn finish(&self, task: &AnalysisTask, outcome: PipelineOutcome) -> DomainResult<TaskStatus> {
        match outcome {
            PipelineOutcome::Completed(result) => {
                match self.state.complete(task, &result).await {
                    Ok(true) => {
                        self.exports.on_completed(task, &result).await;
                        return Ok(TaskStatus::Completed);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        let failure = TaskFailure::new(FailureKind::Internal, format!("failed to store result: {}", e));
                        self.state.fail(task, &failure).await?;
                        return self.current_status(task.id).await;
                    }
                }
                // The completion was refused: a cancel landed after the
                // pipeline finished, so the result is discarded.
                if self.state.finalize_cancelled(task).await? {
                    return Ok(TaskStatus::Cancelled);
                }
                self.current_status(task.id).await
            }
            PipelineOutcome::Failed(failure) => {
                if self.cancellations.cause(task.id) == Some(CancelCause::Requested)
                    && self.state.finalize_cancelled(task).await?
                {
                    return Ok(TaskStatus::Cancelled);
                }
                self.state.fail(task, &failure).await?;
                self.current_status(task.id).await
            }
            PipelineOutcome::Cancelled => match self.cancellations.cause(task.id) {
                Some(CancelCause::Shutdown) => {
                    let failure = TaskFailure::new(FailureKind::Internal, "worker shut down before completion");
                    self.state.fail(task, &failure).await?;
                    self.current_status(task.id).await
                }
                _ => {
                    self.state.finalize_cancelled(task).await?;
                    self.current_status(task.id).await
                }
            },
        }
    }

    async fn current_status(&self, task_id: Uuid) -> DomainResult<TaskStatus> {
        self.store
            .get(task_id)
            .await?
            .map(|t| t.status)
            .ok_or(DomainError::TaskNotFound(task_id))
    }

    async fn run_pipeline(&self, task: &AnalysisTask, token: &CancellationToken) -> DomainResult<PipelineOutcome> {
        let clock = Instant::now();
        self.state.advance(task.id, Milestone::FetchingCommits).await?;

        let fetch = self.fetcher.fetch_commits(&task.repository, &task.date_range, task.developer_filter.as_deref());
        let mut commits = match tokio::time::timeout(self.settings.fetch_timeout, fetch).await {
            Ok(Ok(commits)) => commits,
            Ok(Err(e)) => return Ok(PipelineOutcome::Failed(TaskFailure::new(FailureKind::DataFetch, e.to_string()))),
            Err(_) => {
                return Ok(PipelineOutcome::Failed(TaskFailure::new(
                    FailureKind::DataFetch,
                    format!("data fetch timed out after {}s", self.settings.fetch_timeout.as_secs()),
                )))
            }
        };
        if commits.is_empty() {
            return Ok(PipelineOutcome::Failed(TaskFailure::new(
                FailureKind::InsufficientData,
                "No commits found for the specified criteria",
            )));
        }
        commits.sort_by(|a, b| b.date.cmp(&a.date));

        let stats = compute_stats(&commits, &task.date_range);
        self.state.advance(task.id, Milestone::CommitsFetched).await?;
        debug!(task_id = %task.id, commits = stats.total_commits, "commit statistics computed");

        let ctx = PromptContext {
            repository_name: task.repository.clone(),
            developer_name: task.developer_filter.clone().unwrap_or_else(|| "All developers".to_string()),
            date_range: task.date_range.label(),
            total_commits: stats.total_commits,
            total_additions: stats.total_additions,
            total_deletions: stats.total_deletions,
            file_changes: stats.total_files_changed,
            commit_data: commit_data(&commits, self.settings.prompt_commit_limit)?,
        };
        let prompt = build_prompt(task.analysis_type, task.prompt_template.as_deref(), &ctx);

        self.state.advance(task.id, Milestone::RunningAnalysis).await?;
        let outcome = match self.gateway.invoke(task, &prompt, token).await {
            Ok(outcome) => outcome,
            Err(GatewayError::Cancelled { .. }) => return Ok(PipelineOutcome::Cancelled),
            Err(err @ GatewayError::AllProvidersExhausted { .. }) => {
                let last = err
                    .attempts()
                    .last()
                    .and_then(|a| a.error_message.clone())
                    .unwrap_or_else(|| "no provider available".to_string());
                return Ok(PipelineOutcome::Failed(TaskFailure::new(
                    FailureKind::AllProvidersExhausted,
                    format!("{}; last error: {}", err, last),
                )));
            }
        };

        self.state.advance(task.id, Milestone::AssemblingResult).await?;
        let output = ProviderOutput {
            text: outcome.response.text.clone(),
            provider: outcome.provider.clone(),
            model: outcome.model.clone(),
            tokens_used: outcome.total_tokens(),
            cost_usd: outcome.total_cost(),
            duration_ms: task
                .started_at
                .and_then(|at| (Utc::now() - at).to_std().ok())
                .unwrap_or_else(|| clock.elapsed())
                .as_millis() as u64,
        };
        match assemble(task, &output, &stats) {
            Ok(result) => Ok(PipelineOutcome::Completed(result)),
            Err(e) => Ok(PipelineOutcome::Failed(TaskFailure::new(
                FailureKind::MalformedProviderOutput,
                e.to_string(),
            ))),
        }
    }
}

/// JSON of the newest `limit` commits for the prompt.
fn commit_data(commits: &[CommitRecord], limit: usize) -> DomainResult<String> {
    let recent: Vec<&CommitRecord> = commits.iter().take(limit).collect();
    Ok(serde_json::to_string_pretty(&recent)?)
}

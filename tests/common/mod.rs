//! Common test utilities for integration tests
//!
//! Builds an engine over in-memory adapters with scripted providers, plus
//! sample commits and requests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use commitscope::adapters::memory::{
    InMemoryExportQueue, InMemoryTaskQueue, InMemoryTaskStore, StaticCommitFetcher,
};
use commitscope::adapters::providers::{ScriptedProvider, ScriptedReply};
use commitscope::domain::errors::{DomainError, DomainResult};
use commitscope::domain::models::{
    AnalysisRequest, AnalysisResult, AnalysisTask, AnalysisType, CommitRecord, DateRange,
    GenerationParams, ProviderAttempt, ProviderKind, ProviderSettings, ProvidersConfig, TaskFailure,
    TaskStatus,
};
use commitscope::domain::ports::{AiProvider, TaskFilter, TaskStore};
use commitscope::services::{
    AdmissionPolicy, AnalysisEngine, CircuitBreakerConfig, CircuitBreakerService, EngineComponents,
    EngineSettings, ProviderGateway, ProviderRegistry,
};

pub const USER: &str = "alice";
pub const REPOSITORY: &str = "octo/widgets";

/// Setup test logging
///
/// Initializes tracing subscriber for test output.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// `n` commits from two authors spread over the last few days, newest first.
pub fn sample_commits(n: usize) -> Vec<CommitRecord> {
    let now = Utc::now();
    (0..n)
        .map(|i| CommitRecord {
            sha: format!("{:040x}", i + 1),
            message: format!("Change number {}", i + 1),
            author: if i % 2 == 0 { "Alice Smith".to_string() } else { "Bob Jones".to_string() },
            date: now - ChronoDuration::hours(6 * (i as i64 + 1)),
            additions: 10 + i as u64,
            deletions: 2,
            files_changed: 1 + (i as u64 % 3),
        })
        .collect()
}

pub fn request(user: &str) -> AnalysisRequest {
    AnalysisRequest {
        user_id: user.to_string(),
        repository: REPOSITORY.to_string(),
        developer_filter: None,
        analysis_type: AnalysisType::Comprehensive,
        date_range: DateRange::last_days(30),
        provider: "primary".to_string(),
        model: "model-a".to_string(),
        params: GenerationParams::default(),
        prompt_template: None,
        export: None,
    }
}

/// Provider settings tuned for tests: fast backoff, no rate limiting.
pub fn provider_settings(model: &str, max_retries: u32) -> ProviderSettings {
    let mut settings = ProviderSettings::new(ProviderKind::Openai, model);
    settings.max_retries = max_retries;
    settings.backoff_base_ms = 1;
    settings.backoff_cap_ms = 5;
    settings.requests_per_second = 1000;
    settings.burst_size = 1000;
    settings.timeout_secs = 5;
    settings
}

pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        task_time_limit: Duration::from_secs(10),
        fetch_timeout: Duration::from_secs(5),
        cancel_poll_interval: Duration::from_millis(20),
        prompt_commit_limit: 50,
    }
}

/// In-memory store whose terminal writes fail while `failures_left` is
/// above zero, the way a locked SQLite file does.
pub struct FlakyTaskStore {
    inner: Arc<InMemoryTaskStore>,
    failures_left: AtomicU32,
}

impl FlakyTaskStore {
    pub fn new(inner: Arc<InMemoryTaskStore>) -> Self {
        Self { inner, failures_left: AtomicU32::new(0) }
    }

    pub fn fail_next(&self, count: u32) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    fn trip(&self) -> DomainResult<()> {
        let tripped = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if tripped {
            return Err(DomainError::DatabaseError("database is locked".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FlakyTaskStore {
    async fn create(&self, task: &AnalysisTask) -> DomainResult<()> {
        self.inner.create(task).await
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<AnalysisTask>> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: TaskFilter) -> DomainResult<Vec<AnalysisTask>> {
        self.inner.list(filter).await
    }

    async fn claim(&self, id: Uuid, worker_id: &str) -> DomainResult<bool> {
        self.inner.claim(id, worker_id).await
    }

    async fn update_progress(&self, id: Uuid, progress: u8, step: &str) -> DomainResult<bool> {
        self.inner.update_progress(id, progress, step).await
    }

    async fn request_cancel(&self, id: Uuid) -> DomainResult<bool> {
        self.inner.request_cancel(id).await
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[TaskStatus],
        to: TaskStatus,
        failure: Option<&TaskFailure>,
    ) -> DomainResult<bool> {
        self.trip()?;
        self.inner.transition(id, from, to, failure).await
    }

    async fn complete_with_result(&self, id: Uuid, result: &AnalysisResult) -> DomainResult<bool> {
        self.trip()?;
        self.inner.complete_with_result(id, result).await
    }

    async fn append_attempt(&self, attempt: &ProviderAttempt) -> DomainResult<()> {
        self.inner.append_attempt(attempt).await
    }

    async fn list_attempts(&self, task_id: Uuid) -> DomainResult<Vec<ProviderAttempt>> {
        self.inner.list_attempts(task_id).await
    }

    async fn get_result(&self, task_id: Uuid) -> DomainResult<Option<AnalysisResult>> {
        self.inner.get_result(task_id).await
    }

    async fn set_queue_ref(&self, id: Uuid, queue_ref: &str) -> DomainResult<()> {
        self.inner.set_queue_ref(id, queue_ref).await
    }

    async fn set_export_error(&self, id: Uuid, error: Option<&str>) -> DomainResult<()> {
        self.inner.set_export_error(id, error).await
    }

    async fn add_usage(&self, id: Uuid, tokens: u64, cost_usd: f64) -> DomainResult<()> {
        self.inner.add_usage(id, tokens, cost_usd).await
    }
}

/// Builder for an engine over in-memory adapters.
pub struct HarnessBuilder {
    providers: Vec<(Arc<ScriptedProvider>, ProviderSettings)>,
    fallback: Vec<String>,
    fetcher: StaticCommitFetcher,
    settings: EngineSettings,
    admission: AdmissionPolicy,
    breaker: CircuitBreakerConfig,
}

impl HarnessBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            fallback: Vec::new(),
            fetcher: StaticCommitFetcher::new(sample_commits(6)),
            settings: fast_settings(),
            admission: AdmissionPolicy::default(),
            breaker: CircuitBreakerConfig::disabled(),
        }
    }

    /// Register a provider; it also joins the default fallback list.
    pub fn provider(mut self, provider: Arc<ScriptedProvider>, settings: ProviderSettings) -> Self {
        self.fallback.push(provider.name().to_string());
        self.providers.push((provider, settings));
        self
    }

    pub fn fetcher(mut self, fetcher: StaticCommitFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn settings(mut self, settings: EngineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn admission(mut self, admission: AdmissionPolicy) -> Self {
        self.admission = admission;
        self
    }

    pub fn breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn build(self) -> Harness {
        let mut registry = ProviderRegistry::new();
        for (provider, settings) in self.providers {
            let provider: Arc<dyn AiProvider> = provider;
            registry.register(provider, settings);
        }
        let routing = ProvidersConfig {
            default_fallback: self.fallback,
            fallback_by_type: BTreeMap::new(),
            backends: BTreeMap::new(),
        };

        let store = Arc::new(InMemoryTaskStore::new());
        let flaky = Arc::new(FlakyTaskStore::new(store.clone()));
        let queue = Arc::new(InMemoryTaskQueue::new());
        let exports = Arc::new(InMemoryExportQueue::new(7));
        let gateway = ProviderGateway::new(registry, routing, CircuitBreakerService::new(self.breaker));

        let engine = AnalysisEngine::new(
            EngineComponents {
                store: flaky.clone(),
                queue: queue.clone(),
                fetcher: Arc::new(self.fetcher),
                gateway,
                export_queue: exports.clone(),
                admission: self.admission,
            },
            self.settings,
        );

        Harness { engine: Arc::new(engine), store, flaky, queue, exports }
    }
}

pub struct Harness {
    pub engine: Arc<AnalysisEngine>,
    pub store: Arc<InMemoryTaskStore>,
    /// The store the engine writes through; healthy unless told otherwise.
    pub flaky: Arc<FlakyTaskStore>,
    pub queue: Arc<InMemoryTaskQueue>,
    pub exports: Arc<InMemoryExportQueue>,
}

/// A single provider that answers with the default well-formed analysis.
pub fn healthy_harness() -> (Harness, Arc<ScriptedProvider>) {
    let primary = Arc::new(ScriptedProvider::new("primary"));
    let harness = HarnessBuilder::new().provider(primary.clone(), provider_settings("model-a", 0)).build();
    (harness, primary)
}

pub fn slow_reply(delay: Duration) -> ScriptedReply {
    ScriptedReply::delayed_text(commitscope::adapters::providers::mock::DEFAULT_ANALYSIS, delay)
}

/// Poll the engine until the task reaches `status` or the timeout elapses.
pub async fn wait_for_status(engine: &AnalysisEngine, task_id: uuid::Uuid, status: TaskStatus, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Ok(view) = engine.get_status(task_id).await {
            if view.status == status {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// Poll until the task's step label equals `step`.
pub async fn wait_for_step(engine: &AnalysisEngine, task_id: uuid::Uuid, step: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if let Ok(view) = engine.get_status(task_id).await {
            if view.current_step == step {
                return true;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

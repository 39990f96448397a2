//! Provider gateway: fallback chain, retry with backoff, cost accounting.
//!
//! The gateway walks an ordered chain of providers for a task until one
//! returns a completion. Each call waits on the provider's throttle, runs
//! under the provider's deadline and is recorded as a [`ProviderAttempt`].
//! Retryable failures are retried on the same provider after an exponential
//! backoff; everything else falls through to the next provider.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{GatewayError, ProviderError};
use crate::domain::models::{AnalysisTask, Prompt, ProviderAttempt, ProviderSettings, ProvidersConfig};
use crate::domain::ports::{AiProvider, CompletionRequest, CompletionResponse, TaskStore};
use crate::services::circuit_breaker::CircuitBreakerService;
use crate::services::cost_tracker::estimate_cost_or_fallback;

/// A registered provider with its settings and request throttle.
pub struct ProviderEntry {
    provider: Arc<dyn AiProvider>,
    settings: ProviderSettings,
    limiter: DefaultDirectRateLimiter,
}

impl ProviderEntry {
    pub fn new(provider: Arc<dyn AiProvider>, settings: ProviderSettings) -> Self {
        let rps = NonZeroU32::new(settings.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let burst = NonZeroU32::new(settings.burst_size).unwrap_or(rps);
        let limiter = RateLimiter::direct(Quota::per_second(rps).allow_burst(burst));
        Self { provider, settings, limiter }
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.settings.timeout_secs.max(1))
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.settings.backoff_base_ms))
            .with_max_interval(Duration::from_millis(self.settings.backoff_cap_ms))
            .with_multiplier(2.0)
            .with_randomization_factor(0.1)
            .with_max_elapsed_time(None)
            .build()
    }
}

/// Providers available to the gateway, keyed by name.
#[derive(Default)]
pub struct ProviderRegistry {
    entries: HashMap<String, ProviderEntry>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own name.
    pub fn register(&mut self, provider: Arc<dyn AiProvider>, settings: ProviderSettings) {
        let name = provider.name().to_string();
        debug!(provider = %name, model = %settings.default_model, "registering provider");
        self.entries.insert(name, ProviderEntry::new(provider, settings));
    }

    pub fn get(&self, name: &str) -> Option<&ProviderEntry> {
        self.entries.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Successful gateway run.
#[derive(Debug, Clone)]
pub struct GatewayOutcome {
    /// Every attempt made, the successful one last.
    pub attempts: Vec<ProviderAttempt>,
    pub response: CompletionResponse,
    pub provider: String,
    pub model: String,
}

impl GatewayOutcome {
    /// Tokens across all attempts.
    pub fn total_tokens(&self) -> u64 {
        self.attempts.iter().filter_map(|a| a.tokens_used).sum()
    }

    /// Cost across all attempts.
    pub fn total_cost(&self) -> f64 {
        self.attempts.iter().map(|a| a.cost_usd).sum()
    }
}

pub struct ProviderGateway {
    registry: ProviderRegistry,
    routing: ProvidersConfig,
    breaker: CircuitBreakerService,
    attempt_store: Option<Arc<dyn TaskStore>>,
}

impl ProviderGateway {
    pub fn new(registry: ProviderRegistry, routing: ProvidersConfig, breaker: CircuitBreakerService) -> Self {
        Self { registry, routing, breaker, attempt_store: None }
    }

    /// Persist each attempt and its usage as soon as it finishes.
    pub fn with_attempt_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.attempt_store = Some(store);
        self
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn breaker(&self) -> &CircuitBreakerService {
        &self.breaker
    }

    /// Ordered `(provider, model)` pairs for a task: the requested pair
    /// first, then the fallback list for its analysis type, deduplicated by
    /// provider. Fallbacks use their configured default model.
    pub fn chain_for(&self, task: &AnalysisTask) -> Vec<(String, String)> {
        let mut chain = vec![(task.provider.clone(), task.model.clone())];
        let fallbacks = self
            .routing
            .fallback_by_type
            .get(task.analysis_type.as_str())
            .unwrap_or(&self.routing.default_fallback);

        for name in fallbacks {
            if chain.iter().any(|(p, _)| p == name) {
                continue;
            }
            match self.registry.get(name) {
                Some(entry) => chain.push((name.clone(), entry.settings.default_model.clone())),
                None => warn!(provider = %name, "fallback provider not registered, skipping"),
            }
        }
        chain
    }

    /// Run the fallback chain for `task`.
    #[instrument(skip(self, task, prompt, cancel), fields(task_id = %task.id))]
    pub async fn invoke(
        &self,
        task: &AnalysisTask,
        prompt: &Prompt,
        cancel: &CancellationToken,
    ) -> Result<GatewayOutcome, GatewayError> {
        let mut attempts: Vec<ProviderAttempt> = Vec::new();
        let mut index: u32 = 0;

        for (name, model) in self.chain_for(task) {
            let Some(entry) = self.registry.get(&name) else {
                warn!(provider = %name, "provider not registered, skipping");
                continue;
            };
            if !entry.settings.enabled {
                warn!(provider = %name, "provider disabled, skipping");
                continue;
            }
            if !self.breaker.allows(&name).await {
                warn!(provider = %name, "provider circuit open, skipping");
                continue;
            }

            let mut backoff = entry.backoff();
            let mut retries: u32 = 0;

            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(GatewayError::Cancelled { attempts }),
                    () = entry.limiter.until_ready() => {}
                }

                let request = CompletionRequest {
                    system: prompt.system.clone(),
                    user: prompt.user.clone(),
                    model: model.clone(),
                    temperature: task.params.temperature,
                    max_tokens: task.params.max_tokens,
                    deadline: entry.timeout(),
                };

                let started_at = Utc::now();
                let clock = Instant::now();
                let call = tokio::time::timeout(entry.timeout(), entry.provider.complete(request));
                let result = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(GatewayError::Cancelled { attempts }),
                    r = call => r,
                };
                let latency_ms = clock.elapsed().as_millis() as u64;
                let result = result.unwrap_or_else(|_| {
                    Err(ProviderError::timeout(format!(
                        "no response within {}s",
                        entry.timeout().as_secs()
                    )))
                });

                match result {
                    Ok(response) => {
                        let cost = estimate_cost_or_fallback(
                            &model,
                            response.input_tokens,
                            response.output_tokens,
                        );
                        let attempt = ProviderAttempt::success(
                            task.id,
                            &name,
                            &model,
                            index,
                            latency_ms,
                            response.total_tokens(),
                            cost,
                            started_at,
                        );
                        self.record(&attempt).await;
                        attempts.push(attempt);
                        self.breaker.record_success(&name).await;

                        info!(
                            provider = %name,
                            model = %model,
                            attempts = attempts.len(),
                            tokens = response.total_tokens(),
                            "provider call succeeded"
                        );
                        return Ok(GatewayOutcome { attempts, response, provider: name, model });
                    }
                    Err(err) => {
                        let cost = err
                            .tokens_used
                            .map_or(0.0, |t| estimate_cost_or_fallback(&model, t, 0));
                        let attempt = ProviderAttempt::failure(
                            task.id, &name, &model, index, latency_ms, &err, started_at,
                        )
                        .with_cost(cost);
                        self.record(&attempt).await;
                        attempts.push(attempt);
                        index += 1;
                        self.breaker.record_failure(&name).await;

                        warn!(
                            provider = %name,
                            model = %model,
                            kind = err.kind.as_str(),
                            error = %err.message,
                            "provider call failed"
                        );

                        if err.kind.is_retryable() && retries < entry.settings.max_retries {
                            retries += 1;
                            let delay = backoff
                                .next_backoff()
                                .unwrap_or_else(|| Duration::from_millis(entry.settings.backoff_cap_ms));
                            debug!(provider = %name, retry = retries, ?delay, "retrying provider");
                            tokio::select! {
                                biased;
                                () = cancel.cancelled() => return Err(GatewayError::Cancelled { attempts }),
                                () = tokio::time::sleep(delay) => {}
                            }
                            continue;
                        }
                        break;
                    }
                }
            }
        }

        warn!(attempts = attempts.len(), "all providers exhausted");
        Err(GatewayError::AllProvidersExhausted { attempts })
    }

    async fn record(&self, attempt: &ProviderAttempt) {
        let Some(store) = &self.attempt_store else {
            return;
        };
        if let Err(e) = store.append_attempt(attempt).await {
            warn!(task_id = %attempt.task_id, error = %e, "failed to persist provider attempt");
        }
        let tokens = attempt.tokens_used.unwrap_or(0);
        if tokens > 0 || attempt.cost_usd > 0.0 {
            if let Err(e) = store.add_usage(attempt.task_id, tokens, attempt.cost_usd).await {
                warn!(task_id = %attempt.task_id, error = %e, "failed to record usage");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::providers::mock::{ScriptedProvider, ScriptedReply};
    use crate::domain::errors::ProviderErrorKind;
    use crate::domain::models::{
        AnalysisRequest, AnalysisType, AttemptOutcome, DateRange, GenerationParams, ProviderKind,
    };
    use crate::services::circuit_breaker::CircuitBreakerConfig;
    use uuid::Uuid;

    fn settings(model: &str, max_retries: u32) -> ProviderSettings {
        let mut s = ProviderSettings::new(ProviderKind::Openai, model);
        s.max_retries = max_retries;
        s.backoff_base_ms = 1;
        s.backoff_cap_ms = 5;
        s.timeout_secs = 5;
        s.requests_per_second = 1000;
        s.burst_size = 1000;
        s
    }

    fn task(provider: &str, model: &str) -> AnalysisTask {
        AnalysisTask::from_request(
            Uuid::new_v4(),
            AnalysisRequest {
                user_id: "alice".to_string(),
                repository: "octo/widgets".to_string(),
                developer_filter: None,
                analysis_type: AnalysisType::Quality,
                date_range: DateRange::last_days(7),
                provider: provider.to_string(),
                model: model.to_string(),
                params: GenerationParams::default(),
                prompt_template: None,
                export: None,
            },
        )
    }

    fn prompt() -> Prompt {
        Prompt { system: "sys".to_string(), user: "user".to_string() }
    }

    fn gateway(providers: Vec<(Arc<ScriptedProvider>, u32)>, fallback: &[&str]) -> ProviderGateway {
        let mut registry = ProviderRegistry::new();
        for (p, retries) in providers {
            let model = format!("{}-model", p.name());
            registry.register(p, settings(&model, retries));
        }
        let routing = ProvidersConfig {
            default_fallback: fallback.iter().map(ToString::to_string).collect(),
            fallback_by_type: Default::default(),
            backends: Default::default(),
        };
        ProviderGateway::new(registry, routing, CircuitBreakerService::new(CircuitBreakerConfig::disabled()))
    }

    #[tokio::test]
    async fn test_first_fails_second_succeeds() {
        let a = Arc::new(ScriptedProvider::new("a").then(ScriptedReply::error(ProviderErrorKind::Authentication)));
        let b = Arc::new(ScriptedProvider::new("b").then(ScriptedReply::text("{}")));
        let gw = gateway(vec![(a, 2), (b, 2)], &["a", "b"]);

        let outcome = gw.invoke(&task("a", "a-model"), &prompt(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.provider, "b");
        assert_eq!(outcome.model, "b-model");
        assert_eq!(outcome.attempts.len(), 2);
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::Failure);
        assert_eq!(outcome.attempts[0].attempt_index, 0);
        assert_eq!(outcome.attempts[1].outcome, AttemptOutcome::Success);
        assert_eq!(outcome.attempts[1].attempt_index, 1);
    }

    #[tokio::test]
    async fn test_all_fail_exhausts_chain() {
        let a = Arc::new(ScriptedProvider::new("a").then(ScriptedReply::error(ProviderErrorKind::InvalidRequest)));
        let b = Arc::new(ScriptedProvider::new("b").then(ScriptedReply::error(ProviderErrorKind::Authentication)));
        let gw = gateway(vec![(a, 2), (b, 2)], &["a", "b"]);

        let err = gw.invoke(&task("a", "a-model"), &prompt(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, GatewayError::AllProvidersExhausted { .. }));
        assert_eq!(err.attempts().len(), 2);
    }

    #[tokio::test]
    async fn test_retryable_failure_retried_on_same_provider() {
        let a = Arc::new(
            ScriptedProvider::new("a")
                .then(ScriptedReply::error(ProviderErrorKind::RateLimited))
                .then(ScriptedReply::error(ProviderErrorKind::Unavailable))
                .then(ScriptedReply::text("ok")),
        );
        let gw = gateway(vec![(a.clone(), 2)], &["a"]);

        let outcome = gw.invoke(&task("a", "a-model"), &prompt(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.attempts.len(), 3);
        assert_eq!(a.calls(), 3);
        assert_eq!(outcome.response.text, "ok");
    }

    #[tokio::test]
    async fn test_retries_bounded_per_provider() {
        let a = Arc::new(ScriptedProvider::new("a").repeat(ScriptedReply::error(ProviderErrorKind::Transport)));
        let gw = gateway(vec![(a.clone(), 2)], &["a"]);

        let err = gw.invoke(&task("a", "a-model"), &prompt(), &CancellationToken::new()).await.unwrap_err();
        // One initial call plus two retries.
        assert_eq!(a.calls(), 3);
        assert_eq!(err.attempts().len(), 3);
    }

    #[tokio::test]
    async fn test_timeout_recorded_as_timeout_outcome() {
        let a = Arc::new(ScriptedProvider::new("a").then(ScriptedReply::delayed_text("late", Duration::from_secs(3))));
        let b = Arc::new(ScriptedProvider::new("b").then(ScriptedReply::text("fast")));
        let mut registry = ProviderRegistry::new();
        let mut slow = settings("a-model", 0);
        slow.timeout_secs = 1;
        registry.register(a, slow);
        registry.register(b, settings("b-model", 0));
        let routing = ProvidersConfig {
            default_fallback: vec!["a".to_string(), "b".to_string()],
            fallback_by_type: Default::default(),
            backends: Default::default(),
        };
        let gw = ProviderGateway::new(registry, routing, CircuitBreakerService::new(CircuitBreakerConfig::disabled()));

        let outcome = gw.invoke(&task("a", "a-model"), &prompt(), &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.attempts[0].outcome, AttemptOutcome::Timeout);
        assert_eq!(outcome.response.text, "fast");
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_call() {
        let a = Arc::new(ScriptedProvider::new("a").then(ScriptedReply::delayed_text("late", Duration::from_secs(5))));
        let gw = gateway(vec![(a, 0)], &["a"]);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = gw.invoke(&task("a", "a-model"), &prompt(), &cancel).await.unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled { .. }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_chain_dedupes_and_skips_unknown() {
        let a = Arc::new(ScriptedProvider::new("a"));
        let b = Arc::new(ScriptedProvider::new("b"));
        let gw = gateway(vec![(a, 0), (b, 0)], &["b", "ghost", "a"]);
        let chain = gw.chain_for(&task("a", "custom-model"));
        assert_eq!(
            chain,
            vec![("a".to_string(), "custom-model".to_string()), ("b".to_string(), "b-model".to_string())]
        );
    }

    #[tokio::test]
    async fn test_per_type_fallback_overrides_default() {
        let a = Arc::new(ScriptedProvider::new("a"));
        let b = Arc::new(ScriptedProvider::new("b"));
        let c = Arc::new(ScriptedProvider::new("c"));
        let mut gw = gateway(vec![(a, 0), (b, 0), (c, 0)], &["b"]);
        gw.routing.fallback_by_type.insert("quality".to_string(), vec!["c".to_string()]);
        let chain = gw.chain_for(&task("a", "a-model"));
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].0, "c");
    }
}

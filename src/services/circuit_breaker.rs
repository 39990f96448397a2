//! Per-provider circuit breaker.
//!
//! Tracks recent failures for each AI provider and temporarily removes a
//! provider from fallback chains once it keeps failing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::domain::models::CircuitBreakerSettings;

/// Configuration for circuit breakers.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening the circuit.
    pub failure_threshold: u32,
    /// Duration to keep circuit open before trying half-open.
    pub open_timeout: Duration,
    /// Number of successful calls in half-open state to close circuit.
    pub success_threshold: u32,
    /// Window size for tracking failures (older failures are forgotten).
    pub failure_window: Duration,
    /// Whether to enable circuit breakers.
    pub enabled: bool,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&CircuitBreakerSettings::default())
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        Self {
            failure_threshold: settings.failure_threshold.max(1),
            open_timeout: Duration::seconds(settings.open_timeout_secs as i64),
            success_threshold: settings.success_threshold.max(1),
            failure_window: Duration::seconds(settings.failure_window_secs as i64),
            enabled: settings.enabled,
        }
    }
}

impl CircuitBreakerConfig {
    /// Breaker that never opens.
    pub fn disabled() -> Self {
        Self { enabled: false, ..Self::default() }
    }
}

/// State of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests flow normally.
    Closed,
    /// Circuit is open, requests are blocked.
    Open,
    /// Circuit is testing if the provider has recovered.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Breaker state for one provider.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    pub state: CircuitState,
    /// Timestamps of recent failures.
    pub failures: Vec<DateTime<Utc>>,
    pub half_open_successes: u32,
    pub opened_at: Option<DateTime<Utc>>,
    pub open_count: u32,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failures: Vec::new(),
            half_open_successes: 0,
            opened_at: None,
            open_count: 0,
        }
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>, config: &CircuitBreakerConfig) {
        self.failures.push(now);

        let cutoff = now - config.failure_window;
        self.failures.retain(|f| *f > cutoff);

        match self.state {
            CircuitState::Closed if self.failures.len() as u32 >= config.failure_threshold => {
                self.open(now);
            }
            // Any failure while probing reopens the circuit
            CircuitState::HalfOpen => self.open(now),
            _ => {}
        }
    }

    pub fn record_success(&mut self, config: &CircuitBreakerConfig) {
        if self.state == CircuitState::HalfOpen {
            self.half_open_successes += 1;
            if self.half_open_successes >= config.success_threshold {
                self.close();
            }
        }
    }

    fn open(&mut self, now: DateTime<Utc>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.half_open_successes = 0;
        self.open_count += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.half_open_successes = 0;
        self.failures.clear();
    }

    /// Check if the circuit allows a request, moving an expired open
    /// circuit to half-open.
    pub fn allows(&mut self, now: DateTime<Utc>, config: &CircuitBreakerConfig) -> bool {
        match self.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => match self.opened_at {
                Some(opened_at) if now >= opened_at + config.open_timeout => {
                    self.state = CircuitState::HalfOpen;
                    self.half_open_successes = 0;
                    true
                }
                _ => false,
            },
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics for one provider's breaker.
#[derive(Debug, Clone, Serialize)]
pub struct CircuitStats {
    pub provider: String,
    pub state: String,
    pub failure_count: usize,
    pub open_count: u32,
    pub opened_at: Option<DateTime<Utc>>,
}

/// Circuit breakers keyed by provider name.
#[derive(Debug, Clone)]
pub struct CircuitBreakerService {
    config: CircuitBreakerConfig,
    circuits: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerService {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self { config, circuits: Arc::new(RwLock::new(HashMap::new())) }
    }

    /// Whether `provider` may be called now.
    pub async fn allows(&self, provider: &str) -> bool {
        if !self.config.enabled {
            return true;
        }
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(provider.to_string()).or_default();
        let before = circuit.state;
        let allowed = circuit.allows(Utc::now(), &self.config);
        if before == CircuitState::Open && circuit.state == CircuitState::HalfOpen {
            info!(provider, "circuit half-open, probing provider");
        }
        allowed
    }

    pub async fn record_failure(&self, provider: &str) {
        if !self.config.enabled {
            return;
        }
        let mut circuits = self.circuits.write().await;
        let circuit = circuits.entry(provider.to_string()).or_default();
        let was_open = circuit.state == CircuitState::Open;
        circuit.record_failure(Utc::now(), &self.config);
        if !was_open && circuit.state == CircuitState::Open {
            warn!(provider, open_count = circuit.open_count, "circuit opened for provider");
        }
    }

    pub async fn record_success(&self, provider: &str) {
        if !self.config.enabled {
            return;
        }
        let mut circuits = self.circuits.write().await;
        if let Some(circuit) = circuits.get_mut(provider) {
            let was_half_open = circuit.state == CircuitState::HalfOpen;
            circuit.record_success(&self.config);
            if was_half_open && circuit.state == CircuitState::Closed {
                info!(provider, "circuit closed for provider");
            }
        }
    }

    pub async fn get_state(&self, provider: &str) -> Option<CircuitState> {
        self.circuits.read().await.get(provider).map(|c| c.state)
    }

    pub async fn stats(&self) -> Vec<CircuitStats> {
        let cutoff = Utc::now() - self.config.failure_window;
        let circuits = self.circuits.read().await;
        let mut stats: Vec<CircuitStats> = circuits
            .iter()
            .map(|(provider, c)| CircuitStats {
                provider: provider.clone(),
                state: c.state.as_str().to_string(),
                failure_count: c.failures.iter().filter(|f| **f > cutoff).count(),
                open_count: c.open_count,
                opened_at: c.opened_at,
            })
            .collect();
        stats.sort_by(|a, b| a.provider.cmp(&b.provider));
        stats
    }
}

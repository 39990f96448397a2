//! Provider attempt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::{ProviderError, ProviderErrorKind};

/// Outcome of a single provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
}

impl AttemptOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Timeout => "timeout",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "failure" => Some(Self::Failure),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// One recorded call to one provider. Kept after the task finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderAttempt {
    pub id: Uuid,
    pub task_id: Uuid,
    pub provider: String,
    pub model: String,
    /// Zero-based position across the whole fallback chain.
    pub attempt_index: u32,
    pub outcome: AttemptOutcome,
    pub latency_ms: u64,
    pub tokens_used: Option<u64>,
    pub cost_usd: f64,
    pub error_kind: Option<ProviderErrorKind>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ProviderAttempt {
    /// Record a successful call.
    #[allow(clippy::too_many_arguments)]
    pub fn success(
        task_id: Uuid,
        provider: impl Into<String>,
        model: impl Into<String>,
        attempt_index: u32,
        latency_ms: u64,
        tokens_used: u64,
        cost_usd: f64,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            provider: provider.into(),
            model: model.into(),
            attempt_index,
            outcome: AttemptOutcome::Success,
            latency_ms,
            tokens_used: Some(tokens_used),
            cost_usd,
            error_kind: None,
            error_message: None,
            started_at,
        }
    }

    /// Record a failed call. Timeouts get their own outcome.
    pub fn failure(
        task_id: Uuid,
        provider: impl Into<String>,
        model: impl Into<String>,
        attempt_index: u32,
        latency_ms: u64,
        error: &ProviderError,
        started_at: DateTime<Utc>,
    ) -> Self {
        let outcome = if error.kind == ProviderErrorKind::Timeout {
            AttemptOutcome::Timeout
        } else {
            AttemptOutcome::Failure
        };
        Self {
            id: Uuid::new_v4(),
            task_id,
            provider: provider.into(),
            model: model.into(),
            attempt_index,
            outcome,
            latency_ms,
            tokens_used: error.tokens_used,
            cost_usd: 0.0,
            error_kind: Some(error.kind),
            error_message: Some(error.message.clone()),
            started_at,
        }
    }

    pub fn with_cost(mut self, cost_usd: f64) -> Self {
        self.cost_usd = cost_usd;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == AttemptOutcome::Success
    }
}

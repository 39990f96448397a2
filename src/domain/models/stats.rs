//! Usage statistics views.

use serde::{Deserialize, Serialize};

/// Attempt counts for one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub provider: String,
    pub attempts: u64,
    pub failures: u64,
    pub tokens: u64,
    pub cost_usd: f64,
}

/// Aggregate numbers over a set of tasks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub period_days: i64,
    pub total_tasks: u64,
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_tokens: u64,
    pub total_cost_usd: f64,
    /// Mean wall-clock time of completed tasks, in seconds.
    pub avg_duration_secs: Option<f64>,
    pub most_analyzed_repository: Option<String>,
    pub providers: Vec<ProviderUsage>,
}

//! Normalized analysis results.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commit::{CommitPatterns, DeveloperStats};

/// A numeric metric together with the scale it was clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricValue {
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl MetricValue {
    /// Build a metric, clamping `value` into `[min, max]`. NaN becomes `min`.
    pub fn clamped(value: f64, min: f64, max: f64) -> Self {
        let value = if value.is_nan() { min } else { value.clamp(min, max) };
        Self { value, min, max }
    }

    /// Score on the 0-100 scale.
    pub fn score(value: f64) -> Self {
        Self::clamped(value, 0.0, 100.0)
    }

    /// Ratio on the 0-1 scale.
    pub fn ratio(value: f64) -> Self {
        Self::clamped(value, 0.0, 1.0)
    }
}

/// Result metadata carried alongside the narrative.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub tokens_used: u64,
    /// Time from the task's start to result assembly
    pub duration_ms: u64,
    pub commits_analyzed: u64,
    pub total_additions: u64,
    pub total_deletions: u64,
    pub total_files_changed: u64,
    pub developer_stats: BTreeMap<String, DeveloperStats>,
    pub commit_patterns: CommitPatterns,
}

/// Structured outcome of a completed analysis. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub task_id: Uuid,
    pub narrative: String,
    pub key_insights: Vec<String>,
    pub recommendations: Vec<String>,
    pub metrics: BTreeMap<String, MetricValue>,
    pub metadata: ResultMetadata,
    pub provider: String,
    pub model: String,
    pub cost_usd: f64,
    pub raw_output: String,
    pub created_at: DateTime<Utc>,
}

/// Answer to `GetResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ResultLookup {
    Ready { result: Box<AnalysisResult> },
    NotReady { status: super::task::TaskStatus },
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_clamps_to_scale() {
        assert_eq!(MetricValue::score(140.0).value, 100.0);
        assert_eq!(MetricValue::score(-3.0).value, 0.0);
        assert_eq!(MetricValue::ratio(0.25).value, 0.25);
        assert_eq!(MetricValue::ratio(f64::NAN).value, 0.0);
    }
}

//! Analysis task domain model.
//!
//! An analysis task is the unit of work the engine drives from admission
//! to exactly one terminal status.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::export::ExportOptions;
use super::prompt::validate_template;

/// Longest date range a single analysis may cover.
pub const MAX_RANGE_DAYS: i64 = 365;
/// Longest accepted developer filter.
pub const MAX_DEVELOPER_FILTER_LEN: usize = 255;
/// Upper bound on requested completion tokens.
pub const MAX_COMPLETION_TOKENS: u32 = 32_000;

/// Status of an analysis task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Admitted and queued, not yet claimed by a worker
    Pending,
    /// Claimed by exactly one worker
    Running,
    /// Result persisted
    Completed,
    /// Ended with a recorded error
    Failed,
    /// Ended by an explicit cancellation request
    Cancelled,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" | "processing" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" | "canceled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Valid transitions from this status.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Failed, Self::Cancelled],
            Self::Running => &[Self::Completed, Self::Failed, Self::Cancelled],
            Self::Completed | Self::Failed | Self::Cancelled => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of analysis requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisType {
    Performance,
    Quality,
    Security,
    Comprehensive,
}

impl Default for AnalysisType {
    fn default() -> Self {
        Self::Comprehensive
    }
}

impl AnalysisType {
    pub const ALL: [AnalysisType; 4] =
        [Self::Performance, Self::Quality, Self::Security, Self::Comprehensive];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Performance => "performance",
            Self::Quality => "quality",
            Self::Security => "security",
            Self::Comprehensive => "comprehensive",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "performance" => Some(Self::Performance),
            "quality" => Some(Self::Quality),
            "security" => Some(Self::Security),
            "comprehensive" | "general" => Some(Self::Comprehensive),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnalysisType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive commit date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self { from, to }
    }

    /// Range covering the last `days` days up to now.
    pub fn last_days(days: i64) -> Self {
        let to = Utc::now();
        Self { from: to - Duration::days(days), to }
    }

    /// Calendar days covered, counting both ends; never less than one.
    pub fn days_inclusive(&self) -> i64 {
        ((self.to.date_naive() - self.from.date_naive()).num_days() + 1).max(1)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.from && at <= self.to
    }

    /// Human-readable label used in prompts and exports.
    pub fn label(&self) -> String {
        format!("{} to {}", self.from.format("%Y-%m-%d"), self.to.format("%Y-%m-%d"))
    }
}

/// Generation parameters forwarded to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self { temperature: 0.7, max_tokens: 2000 }
    }
}

/// Failure classification persisted on a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    DataFetch,
    InsufficientData,
    AllProvidersExhausted,
    MalformedProviderOutput,
    Timeout,
    Internal,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataFetch => "data_fetch",
            Self::InsufficientData => "insufficient_data",
            Self::AllProvidersExhausted => "all_providers_exhausted",
            Self::MalformedProviderOutput => "malformed_provider_output",
            Self::Timeout => "timeout",
            Self::Internal => "internal",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "data_fetch" => Some(Self::DataFetch),
            "insufficient_data" => Some(Self::InsufficientData),
            "all_providers_exhausted" => Some(Self::AllProvidersExhausted),
            "malformed_provider_output" => Some(Self::MalformedProviderOutput),
            "timeout" => Some(Self::Timeout),
            "internal" => Some(Self::Internal),
            _ => None,
        }
    }
}

/// Error kind and message recorded with a `failed` transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TaskFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

/// A validated-on-submit analysis request, as handed over by the API layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub user_id: String,
    /// Repository in `owner/name` form.
    pub repository: String,
    #[serde(default)]
    pub developer_filter: Option<String>,
    #[serde(default)]
    pub analysis_type: AnalysisType,
    pub date_range: DateRange,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub params: GenerationParams,
    /// User-supplied prompt template replacing the built-in one.
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// Export to enqueue automatically once the analysis completes.
    #[serde(default)]
    pub export: Option<ExportOptions>,
}

impl AnalysisRequest {
    pub fn validate(&self) -> Result<(), String> {
        if self.user_id.trim().is_empty() {
            return Err("user id cannot be empty".to_string());
        }

        let mut parts = self.repository.split('/');
        let well_formed = matches!(
            (parts.next(), parts.next(), parts.next()),
            (Some(owner), Some(name), None)
                if !owner.is_empty() && !name.is_empty()
                    && !self.repository.chars().any(char::is_whitespace)
        );
        if !well_formed {
            return Err(format!("repository must be in owner/name form, got '{}'", self.repository));
        }

        if let Some(dev) = &self.developer_filter {
            if dev.len() > MAX_DEVELOPER_FILTER_LEN {
                return Err(format!(
                    "developer filter exceeds {} characters",
                    MAX_DEVELOPER_FILTER_LEN
                ));
            }
        }

        if self.date_range.from >= self.date_range.to {
            return Err("date_from must be before date_to".to_string());
        }
        if self.date_range.to - self.date_range.from > Duration::days(MAX_RANGE_DAYS) {
            return Err(format!("date range cannot exceed {} days", MAX_RANGE_DAYS));
        }

        if self.provider.trim().is_empty() || self.model.trim().is_empty() {
            return Err("provider and model are required".to_string());
        }
        if !(0.0..=2.0).contains(&self.params.temperature) {
            return Err(format!("temperature {} outside [0, 2]", self.params.temperature));
        }
        if self.params.max_tokens == 0 || self.params.max_tokens > MAX_COMPLETION_TOKENS {
            return Err(format!(
                "max_tokens {} outside [1, {}]",
                self.params.max_tokens, MAX_COMPLETION_TOKENS
            ));
        }

        if let Some(template) = &self.prompt_template {
            validate_template(template)?;
        }

        Ok(())
    }
}

/// Persisted analysis task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTask {
    pub id: Uuid,
    pub user_id: String,
    pub repository: String,
    pub developer_filter: Option<String>,
    pub analysis_type: AnalysisType,
    pub date_range: DateRange,
    pub provider: String,
    pub model: String,
    pub params: GenerationParams,
    pub prompt_template: Option<String>,
    pub export: Option<ExportOptions>,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_step: String,
    pub error_kind: Option<FailureKind>,
    pub error_message: Option<String>,
    pub cancel_requested: bool,
    /// Tokens summed over every provider attempt.
    pub tokens_used: u64,
    /// Estimated cost in USD summed over every provider attempt.
    pub cost_usd: f64,
    pub worker_id: Option<String>,
    pub queue_ref: Option<String>,
    pub export_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisTask {
    /// Build a fresh pending task from an admitted request.
    pub fn from_request(id: Uuid, request: AnalysisRequest) -> Self {
        Self {
            id,
            user_id: request.user_id,
            repository: request.repository,
            developer_filter: request.developer_filter.filter(|d| !d.trim().is_empty()),
            analysis_type: request.analysis_type,
            date_range: request.date_range,
            provider: request.provider,
            model: request.model,
            params: request.params,
            prompt_template: request.prompt_template,
            export: request.export,
            status: TaskStatus::Pending,
            progress: 0,
            current_step: "Queued".to_string(),
            error_kind: None,
            error_message: None,
            cancel_requested: false,
            tokens_used: 0,
            cost_usd: 0.0,
            worker_id: None,
            queue_ref: None,
            export_error: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Wall-clock duration between start and completion.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Snapshot exposed to the API layer.
    pub fn status_view(&self) -> TaskStatusView {
        TaskStatusView {
            task_id: self.id,
            status: self.status,
            progress: self.progress,
            current_step: self.current_step.clone(),
            error_kind: self.error_kind,
            error_message: self.error_message.clone(),
            export_error: self.export_error.clone(),
        }
    }
}

/// Progress report returned by `GetStatus`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub progress: u8,
    pub current_step: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export_error: Option<String>,
}

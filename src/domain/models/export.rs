//! Export requests and render jobs.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// File format produced by the export renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Excel,
    Csv,
    Json,
    Pdf,
}

impl Default for ExportFormat {
    fn default() -> Self {
        Self::Json
    }
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Excel => "excel",
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Pdf => "pdf",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "excel" | "xlsx" => Some(Self::Excel),
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

/// What the user asked the renderer to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_true")]
    pub include_charts: bool,
    #[serde(default)]
    pub include_raw_data: bool,
}

const fn default_true() -> bool {
    true
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self { format: ExportFormat::default(), include_charts: true, include_raw_data: false }
    }
}

/// Status of a queued render job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportJobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExportJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A render job handed to the export queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    pub id: Uuid,
    pub result_id: Uuid,
    pub task_id: Uuid,
    pub options: ExportOptions,
    pub status: ExportJobStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl ExportJob {
    pub fn new(task_id: Uuid, result_id: Uuid, options: ExportOptions, retention_days: i64) -> Self {
        let created_at = Utc::now();
        Self {
            id: Uuid::new_v4(),
            result_id,
            task_id,
            options,
            status: ExportJobStatus::Pending,
            created_at,
            expires_at: created_at + Duration::days(retention_days),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Answer to an on-demand export request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExportRequestOutcome {
    Enqueued { job_ref: String },
    NotReady { status: super::task::TaskStatus },
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_expires_after_retention() {
        let job = ExportJob::new(Uuid::new_v4(), Uuid::new_v4(), ExportOptions::default(), 7);
        assert_eq!(job.expires_at - job.created_at, Duration::days(7));
        assert!(!job.is_expired(job.created_at));
        assert!(job.is_expired(job.created_at + Duration::days(7)));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let opts: ExportOptions = serde_json::from_str(r#"{"format":"csv"}"#).unwrap();
        assert_eq!(opts.format, ExportFormat::Csv);
        assert!(opts.include_charts);
        assert!(!opts.include_raw_data);
    }
}

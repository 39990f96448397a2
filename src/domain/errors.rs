//! Domain errors for the commitscope analysis engine.

use thiserror::Error;
use uuid::Uuid;

use super::models::{ProviderAttempt, TaskStatus};

/// Domain-level errors that can occur in the engine and its stores.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Analysis result not found for task: {0}")]
    ResultNotFound(Uuid),

    #[error("Invalid state transition from {from} to {to}: {reason}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus, reason: String },

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Queue error: {0}")]
    QueueError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}

/// Why the admission controller turned a request away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The user already holds the maximum number of concurrent slots.
    ConcurrencyLimit,
    /// The user started too many tasks within the rolling window.
    RateLimit,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConcurrencyLimit => write!(f, "concurrency limit reached"),
            Self::RateLimit => write!(f, "hourly rate limit reached"),
        }
    }
}

/// Errors returned from `AnalysisEngine::submit`.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Admission rejected: {0}")]
    Rejected(RejectReason),

    #[error("Invalid analysis request: {0}")]
    Invalid(String),

    #[error(transparent)]
    Internal(#[from] DomainError),
}

/// Classification of a single provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    Timeout,
    RateLimited,
    Unavailable,
    Transport,
    MalformedResponse,
    Authentication,
    InvalidRequest,
}

impl ProviderErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::Transport => "transport",
            Self::MalformedResponse => "malformed_response",
            Self::Authentication => "authentication",
            Self::InvalidRequest => "invalid_request",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "timeout" => Some(Self::Timeout),
            "rate_limited" => Some(Self::RateLimited),
            "unavailable" => Some(Self::Unavailable),
            "transport" => Some(Self::Transport),
            "malformed_response" => Some(Self::MalformedResponse),
            "authentication" => Some(Self::Authentication),
            "invalid_request" => Some(Self::InvalidRequest),
            _ => None,
        }
    }

    /// Whether the same provider may be tried again after a backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Authentication | Self::InvalidRequest)
    }
}

/// Error returned by an `AiProvider` completion call.
#[derive(Debug, Clone, Error)]
#[error("{kind:?}: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
    /// Tokens billed for the failed call, when the provider reports them.
    pub tokens_used: Option<u64>,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), tokens_used: None }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Timeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::Unavailable, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::MalformedResponse, message)
    }

    /// Map an HTTP status code from a provider API to an error kind.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => ProviderErrorKind::Authentication,
            408 => ProviderErrorKind::Timeout,
            429 => ProviderErrorKind::RateLimited,
            400 | 404 | 413 | 422 => ProviderErrorKind::InvalidRequest,
            _ => ProviderErrorKind::Unavailable,
        };
        Self::new(kind, format!("HTTP {}: {}", status, body.into()))
    }
}

/// Error returned by the commit data-fetch collaborator.
#[derive(Debug, Clone, Error)]
pub enum DataFetchError {
    #[error("Repository not found: {0}")]
    NotFound(String),

    #[error("Data fetch rate limited: {0}")]
    RateLimited(String),

    #[error("Data fetch timed out after {0}s")]
    Timeout(u64),

    #[error("Data fetch failed: {0}")]
    Failed(String),
}

/// Terminal outcomes of the provider gateway other than success.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("All providers exhausted after {} attempt(s)", attempts.len())]
    AllProvidersExhausted { attempts: Vec<ProviderAttempt> },

    #[error("Provider invocation cancelled after {} attempt(s)", attempts.len())]
    Cancelled { attempts: Vec<ProviderAttempt> },
}

impl GatewayError {
    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            Self::AllProvidersExhausted { attempts } | Self::Cancelled { attempts } => attempts,
        }
    }
}

/// Content-contract violation detected while assembling a result.
#[derive(Debug, Clone, Error)]
pub enum AssemblyError {
    #[error("Malformed provider output: {0}")]
    MalformedProviderOutput(String),
}

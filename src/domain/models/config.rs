use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Main configuration structure for commitscope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Worker pool and pipeline settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Per-user admission limits
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Commit data fetch settings
    #[serde(default)]
    pub data_fetch: DataFetchConfig,

    /// AI provider registry and fallback order
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Per-provider circuit breaker
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    /// Export queue settings
    #[serde(default)]
    pub export: ExportConfig,

    /// Database configuration
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct EngineConfig {
    /// Number of worker units pulling from the task queue
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Overall deadline for one task pipeline, in seconds
    #[serde(default = "default_task_time_limit_secs")]
    pub task_time_limit_secs: u64,

    /// How often a running task re-reads its cancel flag, in milliseconds
    #[serde(default = "default_cancel_poll_interval_ms")]
    pub cancel_poll_interval_ms: u64,

    /// How often an idle queue re-checks the store, in milliseconds
    #[serde(default = "default_queue_poll_interval_ms")]
    pub queue_poll_interval_ms: u64,

    /// Most recent commits included in the prompt
    #[serde(default = "default_prompt_commit_limit")]
    pub prompt_commit_limit: usize,
}

const fn default_worker_count() -> usize {
    4
}

const fn default_task_time_limit_secs() -> u64 {
    1800
}

const fn default_cancel_poll_interval_ms() -> u64 {
    500
}

const fn default_queue_poll_interval_ms() -> u64 {
    1000
}

const fn default_prompt_commit_limit() -> usize {
    50
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            task_time_limit_secs: default_task_time_limit_secs(),
            cancel_poll_interval_ms: default_cancel_poll_interval_ms(),
            queue_poll_interval_ms: default_queue_poll_interval_ms(),
            prompt_commit_limit: default_prompt_commit_limit(),
        }
    }
}

/// Admission limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AdmissionConfig {
    /// Concurrency slots a user may hold at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_per_user: u32,

    /// Admissions allowed per user within the rolling window
    #[serde(default = "default_max_per_window")]
    pub max_per_window: u32,

    /// Rolling window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

const fn default_max_concurrent() -> u32 {
    5
}

const fn default_max_per_window() -> u32 {
    20
}

const fn default_window_secs() -> u64 {
    3600
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_per_user: default_max_concurrent(),
            max_per_window: default_max_per_window(),
            window_secs: default_window_secs(),
        }
    }
}

/// GitHub data fetch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DataFetchConfig {
    /// Deadline for the whole fetch, in seconds
    #[serde(default = "default_fetch_timeout_secs")]
    pub timeout_secs: u64,

    /// Upper bound on commits fetched for one task
    #[serde(default = "default_max_commits")]
    pub max_commits: usize,

    /// GitHub REST API base URL
    #[serde(default = "default_github_api_url")]
    pub github_api_url: String,

    /// Personal access token for the GitHub API
    #[serde(default)]
    pub github_token: Option<String>,
}

const fn default_fetch_timeout_secs() -> u64 {
    60
}

const fn default_max_commits() -> usize {
    500
}

fn default_github_api_url() -> String {
    "https://api.github.com".to_string()
}

impl Default for DataFetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_fetch_timeout_secs(),
            max_commits: default_max_commits(),
            github_api_url: default_github_api_url(),
            github_token: None,
        }
    }
}

/// Which wire protocol a provider speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Openai,
    Anthropic,
}

/// Settings for one AI provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProviderSettings {
    pub kind: ProviderKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Model used when this provider is reached as a fallback
    pub default_model: String,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Override for the API base URL
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-call deadline in seconds
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries on the same provider for retryable failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Largest backoff delay in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,

    /// Sustained request rate
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Token bucket burst size
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

const fn default_true() -> bool {
    true
}

const fn default_provider_timeout_secs() -> u64 {
    120
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_backoff_base_ms() -> u64 {
    500
}

const fn default_backoff_cap_ms() -> u64 {
    8000
}

const fn default_requests_per_second() -> u32 {
    2
}

const fn default_burst_size() -> u32 {
    4
}

impl ProviderSettings {
    pub fn new(kind: ProviderKind, default_model: impl Into<String>) -> Self {
        Self {
            kind,
            enabled: true,
            default_model: default_model.into(),
            api_key: None,
            base_url: None,
            timeout_secs: default_provider_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_cap_ms: default_backoff_cap_ms(),
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// Provider registry and fallback ordering
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProvidersConfig {
    /// Fallback order used when an analysis type has no list of its own
    #[serde(default = "default_fallback")]
    pub default_fallback: Vec<String>,

    /// Fallback order keyed by analysis type name
    #[serde(default)]
    pub fallback_by_type: BTreeMap<String, Vec<String>>,

    /// Provider settings keyed by provider name
    #[serde(default = "default_backends")]
    pub backends: BTreeMap<String, ProviderSettings>,
}

fn default_fallback() -> Vec<String> {
    vec!["openai".to_string(), "anthropic".to_string()]
}

fn default_backends() -> BTreeMap<String, ProviderSettings> {
    let mut backends = BTreeMap::new();
    backends.insert("openai".to_string(), ProviderSettings::new(ProviderKind::Openai, "gpt-4o-mini"));
    backends.insert(
        "anthropic".to_string(),
        ProviderSettings::new(ProviderKind::Anthropic, "claude-3-5-sonnet-latest"),
    );
    backends
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_fallback: default_fallback(),
            fallback_by_type: BTreeMap::new(),
            backends: default_backends(),
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CircuitBreakerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Failures inside the window that open the circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_failure_window_secs")]
    pub failure_window_secs: u64,

    /// How long an open circuit blocks before half-opening
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,

    /// Half-open successes needed to close
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

const fn default_failure_threshold() -> u32 {
    5
}

const fn default_failure_window_secs() -> u64 {
    600
}

const fn default_open_timeout_secs() -> u64 {
    300
}

const fn default_success_threshold() -> u32 {
    2
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            failure_window_secs: default_failure_window_secs(),
            open_timeout_secs: default_open_timeout_secs(),
            success_threshold: default_success_threshold(),
        }
    }
}

/// Export queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ExportConfig {
    /// Days a rendered export is kept
    #[serde(default = "default_export_retention_days")]
    pub retention_days: i64,
}

const fn default_export_retention_days() -> i64 {
    7
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self { retention_days: default_export_retention_days() }
    }
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct DatabaseConfig {
    /// Path to `SQLite` database file
    #[serde(default = "default_database_path")]
    pub path: String,

    /// Maximum number of database connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_database_path() -> String {
    ".commitscope/commitscope.db".to_string()
}

const fn default_max_connections() -> u32 {
    10
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path(), max_connections: default_max_connections() }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<String>,

    /// File rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

pub mod attempt;
pub mod commit;
pub mod config;
pub mod export;
pub mod prompt;
pub mod result;
pub mod stats;
pub mod task;

pub use attempt::{AttemptOutcome, ProviderAttempt};
pub use commit::{CommitPatterns, CommitRecord, CommitStats, DeveloperStats};
pub use config::{
    AdmissionConfig, CircuitBreakerSettings, Config, DataFetchConfig, DatabaseConfig, EngineConfig,
    ExportConfig, LoggingConfig, ProviderKind, ProviderSettings, ProvidersConfig,
};
pub use export::{ExportFormat, ExportJob, ExportJobStatus, ExportOptions, ExportRequestOutcome};
pub use prompt::{Prompt, PromptContext};
pub use result::{AnalysisResult, MetricValue, ResultLookup, ResultMetadata};
pub use stats::{EngineStats, ProviderUsage};
pub use task::{
    AnalysisRequest, AnalysisTask, AnalysisType, DateRange, FailureKind, GenerationParams,
    TaskFailure, TaskStatus, TaskStatusView,
};

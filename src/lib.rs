//! Commitscope - analysis task orchestration for AI-assisted commit history
//! analysis.
//!
//! Requests are admitted per user, persisted as tasks and picked up by a
//! worker pool. Each task fetches commits from GitHub, computes statistics,
//! asks an AI provider (with retries and fallback) for a narrative, and
//! stores a structured result that can be exported.
//!
//! # Architecture
//!
//! This crate follows Hexagonal Architecture principles:
//!
//! - **Domain Layer** (`domain`): models, errors and port traits
//! - **Service Layer** (`services`): admission, task lifecycle, provider
//!   gateway, result assembly and the engine that ties them together
//! - **Adapters** (`adapters`): SQLite, GitHub, AI providers, in-memory
//!   implementations
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use commitscope::cli::Runtime;
//! use commitscope::ConfigLoader;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let runtime = Runtime::open(ConfigLoader::load()?).await?;
//!     let status = runtime.engine.get_status(task_id).await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult, SubmitError};
pub use domain::models::{
    AnalysisRequest, AnalysisResult, AnalysisTask, AnalysisType, Config, DateRange, TaskStatus,
    TaskStatusView,
};
pub use domain::ports::{AiProvider, CommitFetcher, ExportRenderQueue, TaskQueue, TaskStore};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{AnalysisEngine, CancelOutcome, EngineComponents, EngineSettings, WorkerPool};

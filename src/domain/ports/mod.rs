//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces the engine depends on:
//! - TaskStore: durable task, attempt and result records
//! - CommitFetcher: commit history for a repository and date range
//! - AiProvider: a single completion call against one provider
//! - ExportRenderQueue: hand-off to the export renderer
//! - TaskQueue: the shared queue workers pull task ids from

pub mod data_fetch;
pub mod export_queue;
pub mod provider;
pub mod task_queue;
pub mod task_store;

pub use data_fetch::CommitFetcher;
pub use export_queue::ExportRenderQueue;
pub use provider::{AiProvider, CompletionRequest, CompletionResponse};
pub use task_queue::TaskQueue;
pub use task_store::{TaskFilter, TaskStore};

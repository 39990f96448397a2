//! In-process adapters.
//!
//! Used by tests and by single-process deployments that do not need a
//! durable queue.

pub mod commit_fetcher;
pub mod export_queue;
pub mod task_queue;
pub mod task_store;

pub use commit_fetcher::StaticCommitFetcher;
pub use export_queue::InMemoryExportQueue;
pub use task_queue::{InMemoryTaskQueue, StorePollingQueue};
pub use task_store::InMemoryTaskStore;

//! Cancellation propagation for running tasks.
//!
//! Each running task owns a [`CancellationToken`] registered here. A cancel
//! issued in this process fires the token directly; a cancel issued by
//! another process only raises the store flag, which a per-task watcher
//! polls and turns into a token cancellation.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::ports::TaskStore;

/// Why a task's token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    /// A user asked for cancellation
    Requested,
    /// The worker pool is shutting down
    Shutdown,
}

#[derive(Debug)]
struct Registration {
    token: CancellationToken,
    cause: Option<CancelCause>,
}

/// Tokens of tasks running in this process.
#[derive(Debug, Clone)]
pub struct CancellationRegistry {
    root: CancellationToken,
    tasks: Arc<DashMap<Uuid, Registration>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::with_root(CancellationToken::new())
    }

    /// Registry whose task tokens are children of `root`, so cancelling the
    /// root stops every running task.
    pub fn with_root(root: CancellationToken) -> Self {
        Self { root, tasks: Arc::new(DashMap::new()) }
    }

    pub fn root(&self) -> &CancellationToken {
        &self.root
    }

    /// Create and register the token for a task.
    pub fn register(&self, task_id: Uuid) -> CancellationToken {
        let token = self.root.child_token();
        self.tasks.insert(task_id, Registration { token: token.clone(), cause: None });
        debug!(%task_id, "cancellation token registered");
        token
    }

    /// Fire a task's token. Returns false when the task is not running here.
    pub fn cancel(&self, task_id: Uuid, cause: CancelCause) -> bool {
        match self.tasks.get_mut(&task_id) {
            Some(mut reg) => {
                reg.cause.get_or_insert(cause);
                reg.token.cancel();
                info!(%task_id, ?cause, "task cancellation signalled");
                true
            }
            None => false,
        }
    }

    /// The first cause recorded for a task, or `Shutdown` if only the root fired.
    pub fn cause(&self, task_id: Uuid) -> Option<CancelCause> {
        let reg = self.tasks.get(&task_id)?;
        reg.cause.or_else(|| reg.token.is_cancelled().then_some(CancelCause::Shutdown))
    }

    pub fn unregister(&self, task_id: Uuid) {
        self.tasks.remove(&task_id);
    }

    pub fn is_registered(&self, task_id: Uuid) -> bool {
        self.tasks.contains_key(&task_id)
    }

    pub fn running(&self) -> usize {
        self.tasks.len()
    }

    /// Poll the store's cancel flag every `interval` and fire the task's
    /// token once it is raised. Stops when the token fires or the task
    /// reaches a terminal status.
    pub fn spawn_flag_watcher(
        &self,
        store: Arc<dyn TaskStore>,
        task_id: Uuid,
        interval: Duration,
    ) -> Option<JoinHandle<()>> {
        let token = self.tasks.get(&task_id)?.token.clone();
        let registry = self.clone();
        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = token.cancelled() => return,
                    () = tokio::time::sleep(interval) => {}
                }
                match store.get(task_id).await {
                    Ok(Some(task)) if task.cancel_requested => {
                        registry.cancel(task_id, CancelCause::Requested);
                        return;
                    }
                    Ok(Some(task)) if task.is_terminal() => return,
                    Ok(Some(_)) => {}
                    Ok(None) => return,
                    Err(e) => warn!(%task_id, error = %e, "cancel flag poll failed"),
                }
            }
        }))
    }
}

impl Default for CancellationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_fires_registered_token() {
        let registry = CancellationRegistry::new();
        let id = Uuid::new_v4();
        let token = registry.register(id);
        assert!(registry.cancel(id, CancelCause::Requested));
        assert!(token.is_cancelled());
        assert_eq!(registry.cause(id), Some(CancelCause::Requested));
    }

    #[test]
    fn test_first_cause_wins() {
        let registry = CancellationRegistry::new();
        let id = Uuid::new_v4();
        registry.register(id);
        registry.cancel(id, CancelCause::Shutdown);
        registry.cancel(id, CancelCause::Requested);
        assert_eq!(registry.cause(id), Some(CancelCause::Shutdown));
    }

    #[test]
    fn test_unknown_task_not_cancelled() {
        let registry = CancellationRegistry::new();
        assert!(!registry.cancel(Uuid::new_v4(), CancelCause::Requested));
    }

    #[test]
    fn test_root_cancels_children() {
        let registry = CancellationRegistry::new();
        let id = Uuid::new_v4();
        let token = registry.register(id);
        registry.root().cancel();
        assert!(token.is_cancelled());
        assert_eq!(registry.cause(id), Some(CancelCause::Shutdown));
        registry.unregister(id);
        assert!(!registry.is_registered(id));
    }
}

//! Task queues: an in-process FIFO, and a queue that polls the store for
//! pending tasks.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::TaskStatus;
use crate::domain::ports::{TaskFilter, TaskQueue, TaskStore};

/// FIFO queue of task ids shared by workers in this process.
#[derive(Default)]
pub struct InMemoryTaskQueue {
    items: Mutex<VecDeque<Uuid>>,
    notify: Notify,
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue(&self, task_id: Uuid) -> DomainResult<String> {
        self.items.lock().await.push_back(task_id);
        self.notify.notify_one();
        Ok(format!("mem-{}", task_id))
    }

    async fn dequeue(&self, shutdown: &CancellationToken) -> DomainResult<Option<Uuid>> {
        loop {
            if let Some(id) = self.items.lock().await.pop_front() {
                return Ok(Some(id));
            }
            tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(None),
                () = self.notify.notified() => {}
            }
        }
    }
}

/// Queue backed by the task store itself: workers pick the oldest pending
/// task. Lets several processes share one SQLite database as the queue,
/// since `claim` is what guarantees single ownership.
pub struct StorePollingQueue {
    store: Arc<dyn TaskStore>,
    poll_interval: Duration,
    notify: Notify,
    handed_out: Mutex<HashSet<Uuid>>,
}

impl StorePollingQueue {
    pub fn new(store: Arc<dyn TaskStore>, poll_interval: Duration) -> Self {
        Self { store, poll_interval, notify: Notify::new(), handed_out: Mutex::new(HashSet::new()) }
    }
}

#[async_trait]
impl TaskQueue for StorePollingQueue {
    async fn enqueue(&self, task_id: Uuid) -> DomainResult<String> {
        self.notify.notify_one();
        Ok(format!("store-{}", task_id))
    }

    async fn dequeue(&self, shutdown: &CancellationToken) -> DomainResult<Option<Uuid>> {
        loop {
            let pending = self.store.list(TaskFilter {
                statuses: vec![TaskStatus::Pending],
                oldest_first: true,
                ..Default::default()
            });
            let pending = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(None),
                r = pending => r?,
            };

            {
                let mut handed_out = self.handed_out.lock().await;
                handed_out.retain(|id| pending.iter().any(|t| t.id == *id));
                if let Some(task) = pending.iter().find(|t| !handed_out.contains(&t.id)) {
                    handed_out.insert(task.id);
                    debug!(task_id = %task.id, "pending task picked from store");
                    return Ok(Some(task.id));
                }
            }

            tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(None),
                () = self.notify.notified() => {}
                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = InMemoryTaskQueue::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let job_ref = queue.enqueue(a).await.unwrap();
        queue.enqueue(b).await.unwrap();
        assert!(job_ref.starts_with("mem-"));

        let token = CancellationToken::new();
        assert_eq!(queue.dequeue(&token).await.unwrap(), Some(a));
        assert_eq!(queue.dequeue(&token).await.unwrap(), Some(b));
    }

    #[tokio::test]
    async fn test_dequeue_returns_none_on_shutdown() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let token = CancellationToken::new();
        let waiter = {
            let queue = queue.clone();
            let token = token.clone();
            tokio::spawn(async move { queue.dequeue(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
        assert_eq!(waiter.await.unwrap().unwrap(), None);
    }

    #[test]
    fn test_dequeue_stays_pending_while_empty() {
        let queue = InMemoryTaskQueue::new();
        let token = CancellationToken::new();
        let mut dequeue = tokio_test::task::spawn(queue.dequeue(&token));
        tokio_test::assert_pending!(dequeue.poll());

        let id = Uuid::new_v4();
        tokio_test::block_on(queue.enqueue(id)).unwrap();
        assert!(dequeue.is_woken());
        assert_eq!(tokio_test::assert_ready!(dequeue.poll()).unwrap(), Some(id));
    }

    #[tokio::test]
    async fn test_blocked_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(InMemoryTaskQueue::new());
        let token = CancellationToken::new();
        let waiter = {
            let queue = queue.clone();
            let token = token.clone();
            tokio::spawn(async move { queue.dequeue(&token).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = Uuid::new_v4();
        queue.enqueue(id).await.unwrap();
        assert_eq!(waiter.await.unwrap().unwrap(), Some(id));
    }
}

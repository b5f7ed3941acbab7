//! In-memory `TaskQueue`, used by tests and the `validate` subcommand.

use super::{require_task_id, require_workflow_id, Result, TaskQueue};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Default)]
pub struct InMemoryTaskQueue {
    queues: Mutex<HashMap<String, VecDeque<String>>>,
    notify: Notify,
}

impl InMemoryTaskQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pop_front(&self, workflow_id: &str) -> Option<String> {
        self.queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get_mut(workflow_id)
            .and_then(VecDeque::pop_front)
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn enqueue_task(&self, workflow_id: &str, task_id: &str) -> Result<()> {
        require_workflow_id(workflow_id)?;
        require_task_id(task_id)?;
        self.queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .entry(workflow_id.to_string())
            .or_default()
            .push_back(task_id.to_string());
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue_task(&self, workflow_id: &str, timeout: Duration) -> Result<Option<String>> {
        require_workflow_id(workflow_id)?;
        if let Some(task_id) = self.pop_front(workflow_id) {
            return Ok(Some(task_id));
        }
        if timeout.is_zero() {
            return Ok(None);
        }
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::select! {
                () = notified => {
                    if let Some(task_id) = self.pop_front(workflow_id) {
                        return Ok(Some(task_id));
                    }
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
                () = tokio::time::sleep_until(deadline) => {
                    return Ok(self.pop_front(workflow_id));
                }
            }
        }
    }

    async fn peek_queue(&self, workflow_id: &str, count: usize) -> Result<Vec<String>> {
        require_workflow_id(workflow_id)?;
        Ok(self
            .queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(workflow_id)
            .map(|q| q.iter().take(count).cloned().collect())
            .unwrap_or_default())
    }

    async fn queue_length(&self, workflow_id: &str) -> Result<usize> {
        require_workflow_id(workflow_id)?;
        Ok(self
            .queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(workflow_id)
            .map_or(0, VecDeque::len))
    }

    async fn clear_queue(&self, workflow_id: &str) -> Result<()> {
        require_workflow_id(workflow_id)?;
        self.queues
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(workflow_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = InMemoryTaskQueue::new();
        queue.enqueue_task("wf-1", "t1").await.unwrap();
        queue.enqueue_task("wf-1", "t2").await.unwrap();
        assert_eq!(
            queue.dequeue_task("wf-1", Duration::ZERO).await.unwrap(),
            Some("t1".to_string())
        );
        assert_eq!(
            queue.dequeue_task("wf-1", Duration::ZERO).await.unwrap(),
            Some("t2".to_string())
        );
    }

    #[tokio::test]
    async fn dequeue_with_zero_timeout_returns_none_when_empty() {
        let queue = InMemoryTaskQueue::new();
        assert_eq!(queue.dequeue_task("wf-1", Duration::ZERO).await.unwrap(), None);
    }

    #[tokio::test]
    async fn dequeue_wakes_up_on_enqueue() {
        let queue = std::sync::Arc::new(InMemoryTaskQueue::new());
        let waiter = queue.clone();
        let handle = tokio::spawn(async move {
            waiter.dequeue_task("wf-1", Duration::from_secs(5)).await.unwrap()
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue_task("wf-1", "t1").await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result, Some("t1".to_string()));
    }

    #[tokio::test]
    async fn peek_does_not_remove() {
        let queue = InMemoryTaskQueue::new();
        queue.enqueue_task("wf-1", "t1").await.unwrap();
        assert_eq!(queue.peek_queue("wf-1", 10).await.unwrap(), vec!["t1"]);
        assert_eq!(queue.queue_length("wf-1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_queue_empties_it() {
        let queue = InMemoryTaskQueue::new();
        queue.enqueue_task("wf-1", "t1").await.unwrap();
        queue.clear_queue("wf-1").await.unwrap();
        assert_eq!(queue.queue_length("wf-1").await.unwrap(), 0);
    }
}

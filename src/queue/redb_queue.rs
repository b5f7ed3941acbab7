//! redb-backed durable `TaskQueue`.
//!
//! redb has no cross-process wakeup primitive, so `dequeue_task` polls: try
//! a pop, and if the queue is empty, sleep a short interval and retry until
//! `timeout` elapses. The queue itself (push/pop order, contents) is fully
//! durable; only the "block until something arrives" behavior is emulated.

use super::{require_task_id, require_workflow_id, Error, Result, TaskQueue};
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

const QUEUES: TableDefinition<&str, &[u8]> = TableDefinition::new("queues");

const POLL_INTERVAL: Duration = Duration::from_millis(50);

fn queue_err(message: impl std::fmt::Display) -> Error {
    Error::Queue {
        message: message.to_string(),
    }
}

#[derive(Debug)]
pub struct RedbTaskQueue {
    db: Arc<Database>,
}

impl RedbTaskQueue {
    pub fn new(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|e| queue_err(e))?;
        Self::from_db(Arc::new(db))
    }

    /// Builds on an already-open `Database`, so a store and a queue can
    /// share one redb file without fighting over its exclusive file lock.
    pub fn from_db(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write().map_err(|e| queue_err(e))?;
        write_txn.open_table(QUEUES).map_err(|e| queue_err(e))?;
        write_txn.commit().map_err(|e| queue_err(e))?;
        Ok(Self { db })
    }

    fn try_pop(&self, workflow_id: &str) -> Result<Option<String>> {
        let write_txn = self.db.begin_write().map_err(|e| queue_err(e))?;
        let popped = {
            let mut table = write_txn.open_table(QUEUES).map_err(|e| queue_err(e))?;
            let mut items: VecDeque<String> = match table.get(workflow_id).map_err(|e| queue_err(e))? {
                Some(bytes) => {
                    serde_json::from_slice(bytes.value()).context(super::SerializationSnafu)?
                }
                None => VecDeque::new(),
            };
            let popped = items.pop_front();
            let bytes = serde_json::to_vec(&items).context(super::SerializationSnafu)?;
            table.insert(workflow_id, bytes.as_slice()).map_err(|e| queue_err(e))?;
            popped
        };
        write_txn.commit().map_err(|e| queue_err(e))?;
        Ok(popped)
    }
}

use snafu::ResultExt;

#[async_trait]
impl TaskQueue for RedbTaskQueue {
    async fn enqueue_task(&self, workflow_id: &str, task_id: &str) -> Result<()> {
        require_workflow_id(workflow_id)?;
        require_task_id(task_id)?;
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write().map_err(|e| queue_err(e))?;
            {
                let mut table = write_txn.open_table(QUEUES).map_err(|e| queue_err(e))?;
                let mut items: VecDeque<String> =
                    match table.get(workflow_id.as_str()).map_err(|e| queue_err(e))? {
                        Some(bytes) => {
                            serde_json::from_slice(bytes.value()).context(super::SerializationSnafu)?
                        }
                        None => VecDeque::new(),
                    };
                items.push_back(task_id);
                let bytes = serde_json::to_vec(&items).context(super::SerializationSnafu)?;
                table
                    .insert(workflow_id.as_str(), bytes.as_slice())
                    .map_err(|e| queue_err(e))?;
            }
            write_txn.commit().map_err(|e| queue_err(e))?;
            Ok(())
        })
        .await
        .map_err(|e| queue_err(e))?
    }

    async fn dequeue_task(&self, workflow_id: &str, timeout: Duration) -> Result<Option<String>> {
        require_workflow_id(workflow_id)?;
        if let Some(task_id) = self.try_pop(workflow_id)? {
            return Ok(Some(task_id));
        }
        if timeout.is_zero() {
            return Ok(None);
        }
        let start = Instant::now();
        loop {
            tokio::time::sleep(POLL_INTERVAL).await;
            if let Some(task_id) = self.try_pop(workflow_id)? {
                return Ok(Some(task_id));
            }
            if start.elapsed() >= timeout {
                return Ok(None);
            }
        }
    }

    async fn peek_queue(&self, workflow_id: &str, count: usize) -> Result<Vec<String>> {
        require_workflow_id(workflow_id)?;
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let read_txn = db.begin_read().map_err(|e| queue_err(e))?;
            let table = read_txn.open_table(QUEUES).map_err(|e| queue_err(e))?;
            match table.get(workflow_id.as_str()).map_err(|e| queue_err(e))? {
                Some(bytes) => {
                    let items: VecDeque<String> =
                        serde_json::from_slice(bytes.value()).context(super::SerializationSnafu)?;
                    Ok(items.into_iter().take(count).collect())
                }
                None => Ok(Vec::new()),
            }
        })
        .await
        .map_err(|e| queue_err(e))?
    }

    async fn queue_length(&self, workflow_id: &str) -> Result<usize> {
        require_workflow_id(workflow_id)?;
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize> {
            let read_txn = db.begin_read().map_err(|e| queue_err(e))?;
            let table = read_txn.open_table(QUEUES).map_err(|e| queue_err(e))?;
            match table.get(workflow_id.as_str()).map_err(|e| queue_err(e))? {
                Some(bytes) => {
                    let items: VecDeque<String> =
                        serde_json::from_slice(bytes.value()).context(super::SerializationSnafu)?;
                    Ok(items.len())
                }
                None => Ok(0),
            }
        })
        .await
        .map_err(|e| queue_err(e))?
    }

    async fn clear_queue(&self, workflow_id: &str) -> Result<()> {
        require_workflow_id(workflow_id)?;
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write().map_err(|e| queue_err(e))?;
            {
                let mut table = write_txn.open_table(QUEUES).map_err(|e| queue_err(e))?;
                table.remove(workflow_id.as_str()).map_err(|e| queue_err(e))?;
            }
            write_txn.commit().map_err(|e| queue_err(e))?;
            Ok(())
        })
        .await
        .map_err(|e| queue_err(e))?
    }
}

//! Task Queue (C6): per-workflow FIFO of ready task IDs, handed out to
//! workers with at-most-once delivery.

pub mod mem;
pub mod redb_queue;

use async_trait::async_trait;
use snafu::prelude::*;
use std::time::Duration;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("workflow_id is required"))]
    EmptyWorkflowId,

    #[snafu(display("task_id is required"))]
    EmptyTaskId,

    #[snafu(display("Queue error: {message}"))]
    Queue { message: String },

    #[snafu(display("Serialization error: {source}"))]
    Serialization { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// FIFO task queue, one logical queue per workflow. `dequeue_task` may
/// block up to `timeout`; a zero timeout means return immediately.
#[async_trait]
pub trait TaskQueue: Send + Sync + std::fmt::Debug {
    async fn enqueue_task(&self, workflow_id: &str, task_id: &str) -> Result<()>;
    async fn dequeue_task(&self, workflow_id: &str, timeout: Duration) -> Result<Option<String>>;
    async fn peek_queue(&self, workflow_id: &str, count: usize) -> Result<Vec<String>>;
    async fn queue_length(&self, workflow_id: &str) -> Result<usize>;
    async fn clear_queue(&self, workflow_id: &str) -> Result<()>;
}

pub(crate) fn require_workflow_id(workflow_id: &str) -> Result<()> {
    ensure!(!workflow_id.is_empty(), EmptyWorkflowIdSnafu);
    Ok(())
}

pub(crate) fn require_task_id(task_id: &str) -> Result<()> {
    ensure!(!task_id.is_empty(), EmptyTaskIdSnafu);
    Ok(())
}

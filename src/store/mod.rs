//! State Store (C5): durable persistence of workflow/task state and the
//! dependency bookkeeping the Engine builds fan-in/fan-out on.

pub mod mem;
pub mod redb_store;

use crate::dataref::DataReference;
use crate::dockerinfo::EndpointDirectory;
use crate::state::{TaskState, TaskStatus, WorkflowState, WorkflowStatus};
use async_trait::async_trait;
use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Workflow not found: {workflow_id}"))]
    WorkflowNotFound { workflow_id: String },

    #[snafu(display("Task not found: {workflow_id}/{task_id}"))]
    TaskNotFound { workflow_id: String, task_id: String },

    #[snafu(display("Workflow already exists: {workflow_id}"))]
    WorkflowAlreadyExists { workflow_id: String },

    #[snafu(display("Task already exists: {workflow_id}/{task_id}"))]
    TaskAlreadyExists { workflow_id: String, task_id: String },

    #[snafu(display("Store error: {message}"))]
    Store { message: String },

    #[snafu(display("Serialization error: {source}"))]
    Serialization { source: serde_json::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Durable key-value persistence of workflow/task state. Implementations
/// must serialize writes per key and make the dependency operations safe
/// for concurrent callers (§5) — the Engine's `complete` relies on
/// `remove_dep` being atomic with respect to concurrent removals of other
/// deps of the same dependent.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    async fn create_workflow(&self, workflow_id: &str) -> Result<WorkflowState>;
    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowState>;
    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<WorkflowState>;

    async fn create_task(
        &self,
        workflow_id: &str,
        task_id: &str,
        node_key: &str,
        input_refs: Vec<DataReference>,
    ) -> Result<TaskState>;
    async fn get_task(&self, workflow_id: &str, task_id: &str) -> Result<TaskState>;
    async fn update_task_status(
        &self,
        workflow_id: &str,
        task_id: &str,
        status: TaskStatus,
        output_refs: Option<Vec<DataReference>>,
        error: Option<String>,
    ) -> Result<TaskState>;
    async fn append_input_refs(
        &self,
        workflow_id: &str,
        task_id: &str,
        refs: Vec<DataReference>,
    ) -> Result<TaskState>;
    async fn get_workflow_tasks(&self, workflow_id: &str) -> Result<Vec<TaskState>>;
    async fn delete_workflow(&self, workflow_id: &str) -> Result<()>;

    /// Record that `task_id` depends on `dep_task_id`.
    async fn add_dep(&self, workflow_id: &str, task_id: &str, dep_task_id: &str) -> Result<()>;
    /// Record that `dependent_task_id` is downstream of `task_id`.
    async fn add_dependent(
        &self,
        workflow_id: &str,
        task_id: &str,
        dependent_task_id: &str,
    ) -> Result<()>;
    /// Remove `dep_task_id` from `task_id`'s remaining-deps set, returning
    /// the post-removal count. Must be atomic with concurrent removals
    /// against the same `task_id`.
    async fn remove_dep(
        &self,
        workflow_id: &str,
        task_id: &str,
        dep_task_id: &str,
    ) -> Result<usize>;
    async fn dep_count(&self, workflow_id: &str, task_id: &str) -> Result<usize>;
    async fn dependents(&self, workflow_id: &str, task_id: &str) -> Result<Vec<String>>;

    async fn save_endpoints(
        &self,
        workflow_id: &str,
        endpoints: EndpointDirectory,
    ) -> Result<()>;
    async fn get_endpoints(&self, workflow_id: &str) -> Result<EndpointDirectory>;

    /// All workflows currently in `running` status — driven by the Worker
    /// Daemon's scan loop (C11).
    async fn list_running_workflows(&self) -> Result<Vec<String>>;
}

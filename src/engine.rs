//! Workflow Engine (C7): the orchestration algorithm tying the graph, the
//! state store, and the task queue together — initialize, start, claim,
//! complete, fail.

use crate::dataref::DataReference;
use crate::graph::ExecutionGraph;
use crate::queue::TaskQueue;
use crate::state::{TaskState, TaskStatus, WorkflowState, WorkflowStatus};
use crate::store::StateStore;
use sha2::{Digest, Sha256};
use snafu::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("workflow_id is required"))]
    EmptyWorkflowId,

    #[snafu(display("task_id is required"))]
    EmptyTaskId,

    #[snafu(display("error is required"))]
    EmptyError,

    #[snafu(display("graph must have at least one node"))]
    EmptyGraph,

    #[snafu(display("store error: {source}"))]
    Store { source: crate::store::Error },

    #[snafu(display("queue error: {source}"))]
    Queue { source: crate::queue::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Derives a stable task ID from a node key: 16 hex chars of
/// `sha256(node_key)`, prefixed `task_`.
#[must_use]
pub fn task_id_from_node_key(node_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(node_key.as_bytes());
    let digest = hasher.finalize();
    format!("task_{}", &format!("{digest:x}")[..16])
}

pub struct Engine {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn TaskQueue>,
}

impl Engine {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }

    /// Creates the workflow record and one task per graph node, wiring up
    /// the dependency/dependent bookkeeping the rest of the engine relies
    /// on.
    pub async fn initialize(
        &self,
        workflow_id: &str,
        graph: &ExecutionGraph,
    ) -> Result<WorkflowState> {
        ensure!(!workflow_id.is_empty(), EmptyWorkflowIdSnafu);
        ensure!(!graph.nodes.is_empty(), EmptyGraphSnafu);

        let workflow = self
            .store
            .create_workflow(workflow_id)
            .await
            .context(StoreSnafu)?;

        let node_to_task: HashMap<String, String> = graph
            .nodes
            .keys()
            .map(|key| (key.clone(), task_id_from_node_key(key)))
            .collect();

        for (node_key, _) in &graph.nodes {
            let task_id = &node_to_task[node_key];
            self.store
                .create_task(workflow_id, task_id, node_key, Vec::new())
                .await
                .context(StoreSnafu)?;
        }

        for (node_key, graph_node) in &graph.nodes {
            let task_id = &node_to_task[node_key];
            for dep_key in &graph_node.deps {
                let dep_task_id = &node_to_task[dep_key];
                self.store
                    .add_dep(workflow_id, task_id, dep_task_id)
                    .await
                    .context(StoreSnafu)?;
            }
            for next_key in &graph_node.next {
                let next_task_id = &node_to_task[next_key];
                self.store
                    .add_dependent(workflow_id, task_id, next_task_id)
                    .await
                    .context(StoreSnafu)?;
            }
        }

        Ok(workflow)
    }

    /// Marks the workflow running and enqueues every task with no
    /// remaining dependencies. `initial_inputs`, if given, is attached to
    /// every one of those start tasks before it is enqueued.
    pub async fn start(
        &self,
        workflow_id: &str,
        initial_inputs: Option<Vec<DataReference>>,
    ) -> Result<()> {
        ensure!(!workflow_id.is_empty(), EmptyWorkflowIdSnafu);

        self.store
            .update_workflow_status(workflow_id, WorkflowStatus::Running, None)
            .await
            .context(StoreSnafu)?;

        let tasks = self
            .store
            .get_workflow_tasks(workflow_id)
            .await
            .context(StoreSnafu)?;

        for task in tasks {
            let dep_count = self
                .store
                .dep_count(workflow_id, &task.task_id)
                .await
                .context(StoreSnafu)?;
            if dep_count == 0 {
                if let Some(inputs) = &initial_inputs {
                    if !inputs.is_empty() {
                        self.store
                            .append_input_refs(workflow_id, &task.task_id, inputs.clone())
                            .await
                            .context(StoreSnafu)?;
                    }
                }
                self.queue
                    .enqueue_task(workflow_id, &task.task_id)
                    .await
                    .context(QueueSnafu)?;
            }
        }

        Ok(())
    }

    /// Claims the next ready task, blocking up to `timeout`.
    pub async fn claim(&self, workflow_id: &str, timeout: Duration) -> Result<Option<TaskState>> {
        ensure!(!workflow_id.is_empty(), EmptyWorkflowIdSnafu);

        let Some(task_id) = self
            .queue
            .dequeue_task(workflow_id, timeout)
            .await
            .context(QueueSnafu)?
        else {
            return Ok(None);
        };

        let task = self
            .store
            .update_task_status(workflow_id, &task_id, TaskStatus::Running, None, None)
            .await
            .context(StoreSnafu)?;
        Ok(Some(task))
    }

    /// Marks a task completed, propagates its outputs to dependents as
    /// input, enqueues any dependent whose dependencies are now all
    /// satisfied, and completes the workflow if nothing is left pending.
    pub async fn complete(
        &self,
        workflow_id: &str,
        task_id: &str,
        output_refs: Option<Vec<DataReference>>,
    ) -> Result<TaskState> {
        ensure!(!workflow_id.is_empty(), EmptyWorkflowIdSnafu);
        ensure!(!task_id.is_empty(), EmptyTaskIdSnafu);

        let task = self
            .store
            .update_task_status(
                workflow_id,
                task_id,
                TaskStatus::Completed,
                output_refs.clone(),
                None,
            )
            .await
            .context(StoreSnafu)?;

        let dependent_ids = self
            .store
            .dependents(workflow_id, task_id)
            .await
            .context(StoreSnafu)?;

        for dep_id in dependent_ids {
            if let Some(refs) = &output_refs {
                if !refs.is_empty() {
                    self.store
                        .append_input_refs(workflow_id, &dep_id, refs.clone())
                        .await
                        .context(StoreSnafu)?;
                }
            }

            let remaining = self
                .store
                .remove_dep(workflow_id, &dep_id, task_id)
                .await
                .context(StoreSnafu)?;

            if remaining == 0 {
                self.queue
                    .enqueue_task(workflow_id, &dep_id)
                    .await
                    .context(QueueSnafu)?;
            }
        }

        if self.all_tasks_completed(workflow_id).await? {
            self.store
                .update_workflow_status(workflow_id, WorkflowStatus::Completed, None)
                .await
                .context(StoreSnafu)?;
        }

        Ok(task)
    }

    /// Marks a task failed and fails the whole workflow — there is no
    /// retry path (§4.4).
    pub async fn fail(&self, workflow_id: &str, task_id: &str, error: &str) -> Result<TaskState> {
        ensure!(!workflow_id.is_empty(), EmptyWorkflowIdSnafu);
        ensure!(!task_id.is_empty(), EmptyTaskIdSnafu);
        ensure!(!error.is_empty(), EmptyErrorSnafu);

        let task = self
            .store
            .update_task_status(
                workflow_id,
                task_id,
                TaskStatus::Failed,
                None,
                Some(error.to_string()),
            )
            .await
            .context(StoreSnafu)?;

        self.store
            .update_workflow_status(
                workflow_id,
                WorkflowStatus::Failed,
                Some(format!("Task {task_id} failed: {error}")),
            )
            .await
            .context(StoreSnafu)?;

        Ok(task)
    }

    pub async fn get_workflow_status(&self, workflow_id: &str) -> Result<WorkflowState> {
        ensure!(!workflow_id.is_empty(), EmptyWorkflowIdSnafu);
        self.store.get_workflow(workflow_id).await.context(StoreSnafu)
    }

    pub async fn is_workflow_complete(&self, workflow_id: &str) -> Result<bool> {
        Ok(self.get_workflow_status(workflow_id).await?.status.is_terminal())
    }

    pub async fn get_all_tasks(&self, workflow_id: &str) -> Result<Vec<TaskState>> {
        ensure!(!workflow_id.is_empty(), EmptyWorkflowIdSnafu);
        self.store
            .get_workflow_tasks(workflow_id)
            .await
            .context(StoreSnafu)
    }

    async fn all_tasks_completed(&self, workflow_id: &str) -> Result<bool> {
        let tasks = self
            .store
            .get_workflow_tasks(workflow_id)
            .await
            .context(StoreSnafu)?;
        Ok(tasks.iter().all(|t| t.status == TaskStatus::Completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{node_key, ExecutionGraph, GraphNode, OperationSignature};
    use crate::queue::mem::InMemoryTaskQueue;
    use crate::store::mem::InMemoryStateStore;

    fn op(name: &str) -> OperationSignature {
        OperationSignature {
            operation_name: name.to_string(),
            input_message_name: "In".to_string(),
            output_message_name: "Out".to_string(),
            input_message_stream: false,
            output_message_stream: false,
        }
    }

    fn linear_graph() -> ExecutionGraph {
        let mut graph = ExecutionGraph::default();
        let a = node_key("a", "Process");
        let b = node_key("b", "Process");
        graph.add_node(GraphNode {
            container_name: "a".to_string(),
            proto_uri: "a.proto".to_string(),
            image: "a:latest".to_string(),
            node_type: "task".to_string(),
            operation: op("Process"),
            next: vec![b.clone()],
            deps: vec![],
        });
        graph.add_node(GraphNode {
            container_name: "b".to_string(),
            proto_uri: "b.proto".to_string(),
            image: "b:latest".to_string(),
            node_type: "task".to_string(),
            operation: op("Process"),
            next: vec![],
            deps: vec![a],
        });
        graph.start_keys = graph
            .nodes
            .values()
            .filter(|n| n.deps.is_empty())
            .map(GraphNode::key)
            .collect();
        graph
    }

    fn engine() -> Engine {
        Engine::new(
            Arc::new(InMemoryStateStore::new()),
            Arc::new(InMemoryTaskQueue::new()),
        )
    }

    #[tokio::test]
    async fn initialize_creates_one_task_per_node() {
        let engine = engine();
        let graph = linear_graph();
        engine.initialize("wf-1", &graph).await.unwrap();
        let tasks = engine.get_all_tasks("wf-1").await.unwrap();
        assert_eq!(tasks.len(), 2);
    }

    #[tokio::test]
    async fn start_enqueues_only_tasks_with_no_deps() {
        let engine = engine();
        let graph = linear_graph();
        engine.initialize("wf-1", &graph).await.unwrap();
        engine.start("wf-1", None).await.unwrap();
        let claimed = engine.claim("wf-1", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(claimed.node_key, "a:Process");
        assert!(engine.claim("wf-1", Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn completing_start_task_unblocks_dependent() {
        let engine = engine();
        let graph = linear_graph();
        engine.initialize("wf-1", &graph).await.unwrap();
        engine.start("wf-1", None).await.unwrap();
        let a = engine.claim("wf-1", Duration::ZERO).await.unwrap().unwrap();
        engine.complete("wf-1", &a.task_id, None).await.unwrap();
        let b = engine.claim("wf-1", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(b.node_key, "b:Process");
    }

    #[tokio::test]
    async fn completing_all_tasks_completes_workflow() {
        let engine = engine();
        let graph = linear_graph();
        engine.initialize("wf-1", &graph).await.unwrap();
        engine.start("wf-1", None).await.unwrap();
        let a = engine.claim("wf-1", Duration::ZERO).await.unwrap().unwrap();
        engine.complete("wf-1", &a.task_id, None).await.unwrap();
        let b = engine.claim("wf-1", Duration::ZERO).await.unwrap().unwrap();
        engine.complete("wf-1", &b.task_id, None).await.unwrap();
        let status = engine.get_workflow_status("wf-1").await.unwrap();
        assert_eq!(status.status, WorkflowStatus::Completed);
    }

    #[tokio::test]
    async fn failing_a_task_fails_the_workflow() {
        let engine = engine();
        let graph = linear_graph();
        engine.initialize("wf-1", &graph).await.unwrap();
        engine.start("wf-1", None).await.unwrap();
        let a = engine.claim("wf-1", Duration::ZERO).await.unwrap().unwrap();
        engine.fail("wf-1", &a.task_id, "boom").await.unwrap();
        let status = engine.get_workflow_status("wf-1").await.unwrap();
        assert_eq!(status.status, WorkflowStatus::Failed);
    }

    #[test]
    fn task_id_is_stable_and_16_hex_chars() {
        let id1 = task_id_from_node_key("svc:Process");
        let id2 = task_id_from_node_key("svc:Process");
        assert_eq!(id1, id2);
        assert_eq!(id1.strip_prefix("task_").unwrap().len(), 16);
    }
}

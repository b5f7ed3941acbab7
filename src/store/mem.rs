//! In-memory `StateStore`, used by tests and the `validate` subcommand.

use super::{Error, Result, StateStore};
use crate::dataref::DataReference;
use crate::dockerinfo::EndpointDirectory;
use crate::state::{TaskState, TaskStatus, WorkflowState, WorkflowStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Inner {
    workflows: HashMap<String, WorkflowState>,
    tasks: HashMap<(String, String), TaskState>,
    task_index: HashMap<String, Vec<String>>,
    deps: HashMap<(String, String), HashSet<String>>,
    dependents: HashMap<(String, String), HashSet<String>>,
    endpoints: HashMap<String, EndpointDirectory>,
}

/// Every operation takes the single lock, which is what makes
/// `remove_dep` atomic with respect to concurrent callers — exactly the
/// guarantee §5 asks of the store's shared-resource policy.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create_workflow(&self, workflow_id: &str) -> Result<WorkflowState> {
        let mut inner = self.lock();
        if inner.workflows.contains_key(workflow_id) {
            return Err(Error::WorkflowAlreadyExists {
                workflow_id: workflow_id.to_string(),
            });
        }
        let now = Utc::now();
        let state = WorkflowState {
            workflow_id: workflow_id.to_string(),
            status: WorkflowStatus::Pending,
            created_at: now,
            updated_at: now,
            error: None,
        };
        inner.workflows.insert(workflow_id.to_string(), state.clone());
        Ok(state)
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowState> {
        self.lock()
            .workflows
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| Error::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })
    }

    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<WorkflowState> {
        let mut inner = self.lock();
        let state = inner
            .workflows
            .get_mut(workflow_id)
            .ok_or_else(|| Error::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })?;

        if state.status.is_terminal() {
            tracing::warn!(
                workflow_id,
                current = ?state.status,
                attempted = ?status,
                "refusing to transition a terminal workflow"
            );
            return Ok(state.clone());
        }

        state.status = status;
        state.updated_at = Utc::now();
        state.error = error;
        Ok(state.clone())
    }

    async fn create_task(
        &self,
        workflow_id: &str,
        task_id: &str,
        node_key: &str,
        input_refs: Vec<DataReference>,
    ) -> Result<TaskState> {
        let mut inner = self.lock();
        if !inner.workflows.contains_key(workflow_id) {
            return Err(Error::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            });
        }
        let key = (workflow_id.to_string(), task_id.to_string());
        if inner.tasks.contains_key(&key) {
            return Err(Error::TaskAlreadyExists {
                workflow_id: workflow_id.to_string(),
                task_id: task_id.to_string(),
            });
        }
        let now = Utc::now();
        let state = TaskState {
            task_id: task_id.to_string(),
            workflow_id: workflow_id.to_string(),
            node_key: node_key.to_string(),
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            input_refs,
            output_refs: Vec::new(),
            error: None,
        };
        inner.tasks.insert(key, state.clone());
        inner
            .task_index
            .entry(workflow_id.to_string())
            .or_default()
            .push(task_id.to_string());
        Ok(state)
    }

    async fn get_task(&self, workflow_id: &str, task_id: &str) -> Result<TaskState> {
        let key = (workflow_id.to_string(), task_id.to_string());
        self.lock()
            .tasks
            .get(&key)
            .cloned()
            .ok_or_else(|| Error::TaskNotFound {
                workflow_id: workflow_id.to_string(),
                task_id: task_id.to_string(),
            })
    }

    async fn update_task_status(
        &self,
        workflow_id: &str,
        task_id: &str,
        status: TaskStatus,
        output_refs: Option<Vec<DataReference>>,
        error: Option<String>,
    ) -> Result<TaskState> {
        let mut inner = self.lock();
        let key = (workflow_id.to_string(), task_id.to_string());
        let state = inner.tasks.get_mut(&key).ok_or_else(|| Error::TaskNotFound {
            workflow_id: workflow_id.to_string(),
            task_id: task_id.to_string(),
        })?;
        state.status = status;
        state.updated_at = Utc::now();
        if let Some(refs) = output_refs {
            state.output_refs = refs;
        }
        if error.is_some() {
            state.error = error;
        }
        Ok(state.clone())
    }

    async fn append_input_refs(
        &self,
        workflow_id: &str,
        task_id: &str,
        refs: Vec<DataReference>,
    ) -> Result<TaskState> {
        let mut inner = self.lock();
        let key = (workflow_id.to_string(), task_id.to_string());
        let state = inner.tasks.get_mut(&key).ok_or_else(|| Error::TaskNotFound {
            workflow_id: workflow_id.to_string(),
            task_id: task_id.to_string(),
        })?;
        state.input_refs.extend(refs);
        state.updated_at = Utc::now();
        Ok(state.clone())
    }

    async fn get_workflow_tasks(&self, workflow_id: &str) -> Result<Vec<TaskState>> {
        let inner = self.lock();
        if !inner.workflows.contains_key(workflow_id) {
            return Err(Error::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            });
        }
        let ids = inner.task_index.get(workflow_id).cloned().unwrap_or_default();
        let mut tasks: Vec<TaskState> = ids
            .into_iter()
            .filter_map(|id| inner.tasks.get(&(workflow_id.to_string(), id)).cloned())
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<()> {
        let mut inner = self.lock();
        let ids = inner.task_index.remove(workflow_id).unwrap_or_default();
        for id in &ids {
            let key = (workflow_id.to_string(), id.clone());
            inner.tasks.remove(&key);
            inner.deps.remove(&key);
            inner.dependents.remove(&key);
        }
        inner.endpoints.remove(workflow_id);
        inner.workflows.remove(workflow_id);
        Ok(())
    }

    async fn add_dep(&self, workflow_id: &str, task_id: &str, dep_task_id: &str) -> Result<()> {
        let mut inner = self.lock();
        inner
            .deps
            .entry((workflow_id.to_string(), task_id.to_string()))
            .or_default()
            .insert(dep_task_id.to_string());
        Ok(())
    }

    async fn add_dependent(
        &self,
        workflow_id: &str,
        task_id: &str,
        dependent_task_id: &str,
    ) -> Result<()> {
        let mut inner = self.lock();
        inner
            .dependents
            .entry((workflow_id.to_string(), task_id.to_string()))
            .or_default()
            .insert(dependent_task_id.to_string());
        Ok(())
    }

    async fn remove_dep(
        &self,
        workflow_id: &str,
        task_id: &str,
        dep_task_id: &str,
    ) -> Result<usize> {
        let mut inner = self.lock();
        let key = (workflow_id.to_string(), task_id.to_string());
        let set = inner.deps.entry(key).or_default();
        set.remove(dep_task_id);
        Ok(set.len())
    }

    async fn dep_count(&self, workflow_id: &str, task_id: &str) -> Result<usize> {
        let inner = self.lock();
        Ok(inner
            .deps
            .get(&(workflow_id.to_string(), task_id.to_string()))
            .map_or(0, HashSet::len))
    }

    async fn dependents(&self, workflow_id: &str, task_id: &str) -> Result<Vec<String>> {
        let inner = self.lock();
        Ok(inner
            .dependents
            .get(&(workflow_id.to_string(), task_id.to_string()))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn save_endpoints(
        &self,
        workflow_id: &str,
        endpoints: EndpointDirectory,
    ) -> Result<()> {
        self.lock().endpoints.insert(workflow_id.to_string(), endpoints);
        Ok(())
    }

    async fn get_endpoints(&self, workflow_id: &str) -> Result<EndpointDirectory> {
        Ok(self
            .lock()
            .endpoints
            .get(workflow_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_running_workflows(&self) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .workflows
            .values()
            .filter(|w| w.status == WorkflowStatus::Running)
            .map(|w| w.workflow_id.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_workflow_rejects_duplicate() {
        let store = InMemoryStateStore::new();
        store.create_workflow("wf-1").await.unwrap();
        assert!(matches!(
            store.create_workflow("wf-1").await,
            Err(Error::WorkflowAlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn get_workflow_missing_is_not_found() {
        let store = InMemoryStateStore::new();
        assert!(matches!(
            store.get_workflow("nope").await,
            Err(Error::WorkflowNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn terminal_workflow_status_refuses_transition() {
        let store = InMemoryStateStore::new();
        store.create_workflow("wf-1").await.unwrap();
        store
            .update_workflow_status("wf-1", WorkflowStatus::Failed, Some("boom".into()))
            .await
            .unwrap();
        let after = store
            .update_workflow_status("wf-1", WorkflowStatus::Completed, None)
            .await
            .unwrap();
        assert_eq!(after.status, WorkflowStatus::Failed);
    }

    #[tokio::test]
    async fn remove_dep_reports_remaining_count() {
        let store = InMemoryStateStore::new();
        store.add_dep("wf-1", "t2", "t1").await.unwrap();
        store.add_dep("wf-1", "t2", "t0").await.unwrap();
        assert_eq!(store.dep_count("wf-1", "t2").await.unwrap(), 2);
        let remaining = store.remove_dep("wf-1", "t2", "t1").await.unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn get_workflow_tasks_is_ordered_by_creation() {
        let store = InMemoryStateStore::new();
        store.create_workflow("wf-1").await.unwrap();
        store
            .create_task("wf-1", "t1", "a:Process", vec![])
            .await
            .unwrap();
        store
            .create_task("wf-1", "t2", "b:Process", vec![])
            .await
            .unwrap();
        let tasks = store.get_workflow_tasks("wf-1").await.unwrap();
        assert_eq!(tasks.iter().map(|t| t.task_id.clone()).collect::<Vec<_>>(), vec!["t1", "t2"]);
    }
}

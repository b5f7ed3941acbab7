//! redb-backed durable `StateStore`.
//!
//! redb's API is synchronous, so every operation here runs inside
//! `spawn_blocking`, the same shape the container persistence provider
//! uses. Each read-modify-write (notably `remove_dep`) happens inside a
//! single redb write transaction, which is what gives callers the
//! atomicity the trait promises.

use super::{Error, Result, StateStore};
use crate::dataref::DataReference;
use crate::dockerinfo::EndpointDirectory;
use crate::state::{TaskState, TaskStatus, WorkflowState, WorkflowStatus};
use async_trait::async_trait;
use chrono::Utc;
use redb::{Database, ReadableTable, TableDefinition};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

const WORKFLOWS: TableDefinition<&str, &[u8]> = TableDefinition::new("workflows");
const TASKS: TableDefinition<&str, &[u8]> = TableDefinition::new("tasks");
const TASK_INDEX: TableDefinition<&str, &[u8]> = TableDefinition::new("task_index");
const DEPS: TableDefinition<&str, &[u8]> = TableDefinition::new("deps");
const DEPENDENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("dependents");
const ENDPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("endpoints");

fn task_key(workflow_id: &str, task_id: &str) -> String {
    format!("{workflow_id}/{task_id}")
}

fn store_err(message: impl std::fmt::Display) -> Error {
    Error::Store {
        message: message.to_string(),
    }
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).context(super::SerializationSnafu)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).context(super::SerializationSnafu)
}

use snafu::ResultExt;

#[derive(Debug)]
pub struct RedbStateStore {
    db: Arc<Database>,
}

impl RedbStateStore {
    pub fn new(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(|e| store_err(e))?;
        Self::from_db(Arc::new(db))
    }

    /// Builds on an already-open `Database`, so a store and a queue can
    /// share one redb file without fighting over its exclusive file lock.
    pub fn from_db(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write().map_err(|e| store_err(e))?;
        write_txn.open_table(WORKFLOWS).map_err(|e| store_err(e))?;
        write_txn.open_table(TASKS).map_err(|e| store_err(e))?;
        write_txn.open_table(TASK_INDEX).map_err(|e| store_err(e))?;
        write_txn.open_table(DEPS).map_err(|e| store_err(e))?;
        write_txn.open_table(DEPENDENTS).map_err(|e| store_err(e))?;
        write_txn.open_table(ENDPOINTS).map_err(|e| store_err(e))?;
        write_txn.commit().map_err(|e| store_err(e))?;
        Ok(Self { db })
    }
}

#[async_trait]
impl StateStore for RedbStateStore {
    async fn create_workflow(&self, workflow_id: &str) -> Result<WorkflowState> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<WorkflowState> {
            let write_txn = db.begin_write().map_err(|e| store_err(e))?;
            let state = {
                let mut table = write_txn.open_table(WORKFLOWS).map_err(|e| store_err(e))?;
                if table.get(workflow_id.as_str()).map_err(|e| store_err(e))?.is_some() {
                    return Err(Error::WorkflowAlreadyExists { workflow_id });
                }
                let now = Utc::now();
                let state = WorkflowState {
                    workflow_id: workflow_id.clone(),
                    status: WorkflowStatus::Pending,
                    created_at: now,
                    updated_at: now,
                    error: None,
                };
                let bytes = encode(&state)?;
                table
                    .insert(workflow_id.as_str(), bytes.as_slice())
                    .map_err(|e| store_err(e))?;
                state
            };
            write_txn.commit().map_err(|e| store_err(e))?;
            Ok(state)
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn get_workflow(&self, workflow_id: &str) -> Result<WorkflowState> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<WorkflowState> {
            let read_txn = db.begin_read().map_err(|e| store_err(e))?;
            let table = read_txn.open_table(WORKFLOWS).map_err(|e| store_err(e))?;
            let bytes = table
                .get(workflow_id.as_str())
                .map_err(|e| store_err(e))?
                .ok_or_else(|| Error::WorkflowNotFound {
                    workflow_id: workflow_id.clone(),
                })?;
            decode(bytes.value())
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        error: Option<String>,
    ) -> Result<WorkflowState> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<WorkflowState> {
            let write_txn = db.begin_write().map_err(|e| store_err(e))?;
            let state = {
                let mut table = write_txn.open_table(WORKFLOWS).map_err(|e| store_err(e))?;
                let bytes = table
                    .get(workflow_id.as_str())
                    .map_err(|e| store_err(e))?
                    .ok_or_else(|| Error::WorkflowNotFound {
                        workflow_id: workflow_id.clone(),
                    })?;
                let mut state: WorkflowState = decode(bytes.value())?;
                drop(bytes);

                if state.status.is_terminal() {
                    tracing::warn!(
                        workflow_id = workflow_id.as_str(),
                        current = ?state.status,
                        attempted = ?status,
                        "refusing to transition a terminal workflow"
                    );
                    return Ok(state);
                }

                state.status = status;
                state.updated_at = Utc::now();
                state.error = error;
                let bytes = encode(&state)?;
                table
                    .insert(workflow_id.as_str(), bytes.as_slice())
                    .map_err(|e| store_err(e))?;
                state
            };
            write_txn.commit().map_err(|e| store_err(e))?;
            Ok(state)
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn create_task(
        &self,
        workflow_id: &str,
        task_id: &str,
        node_key: &str,
        input_refs: Vec<DataReference>,
    ) -> Result<TaskState> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        let task_id = task_id.to_string();
        let node_key = node_key.to_string();
        tokio::task::spawn_blocking(move || -> Result<TaskState> {
            let write_txn = db.begin_write().map_err(|e| store_err(e))?;
            let state = {
                let workflows = write_txn.open_table(WORKFLOWS).map_err(|e| store_err(e))?;
                if workflows.get(workflow_id.as_str()).map_err(|e| store_err(e))?.is_none() {
                    return Err(Error::WorkflowNotFound {
                        workflow_id: workflow_id.clone(),
                    });
                }
                drop(workflows);

                let key = task_key(&workflow_id, &task_id);
                let mut tasks = write_txn.open_table(TASKS).map_err(|e| store_err(e))?;
                if tasks.get(key.as_str()).map_err(|e| store_err(e))?.is_some() {
                    return Err(Error::TaskAlreadyExists {
                        workflow_id: workflow_id.clone(),
                        task_id: task_id.clone(),
                    });
                }
                let now = Utc::now();
                let state = TaskState {
                    task_id: task_id.clone(),
                    workflow_id: workflow_id.clone(),
                    node_key,
                    status: TaskStatus::Pending,
                    created_at: now,
                    updated_at: now,
                    input_refs,
                    output_refs: Vec::new(),
                    error: None,
                };
                let bytes = encode(&state)?;
                tasks.insert(key.as_str(), bytes.as_slice()).map_err(|e| store_err(e))?;
                drop(tasks);

                let mut index = write_txn.open_table(TASK_INDEX).map_err(|e| store_err(e))?;
                let mut ids: Vec<String> = match index.get(workflow_id.as_str()).map_err(|e| store_err(e))? {
                    Some(bytes) => decode(bytes.value())?,
                    None => Vec::new(),
                };
                ids.push(task_id.clone());
                let bytes = encode(&ids)?;
                index
                    .insert(workflow_id.as_str(), bytes.as_slice())
                    .map_err(|e| store_err(e))?;
                state
            };
            write_txn.commit().map_err(|e| store_err(e))?;
            Ok(state)
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn get_task(&self, workflow_id: &str, task_id: &str) -> Result<TaskState> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<TaskState> {
            let key = task_key(&workflow_id, &task_id);
            let read_txn = db.begin_read().map_err(|e| store_err(e))?;
            let table = read_txn.open_table(TASKS).map_err(|e| store_err(e))?;
            let bytes = table
                .get(key.as_str())
                .map_err(|e| store_err(e))?
                .ok_or_else(|| Error::TaskNotFound {
                    workflow_id: workflow_id.clone(),
                    task_id: task_id.clone(),
                })?;
            decode(bytes.value())
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn update_task_status(
        &self,
        workflow_id: &str,
        task_id: &str,
        status: TaskStatus,
        output_refs: Option<Vec<DataReference>>,
        error: Option<String>,
    ) -> Result<TaskState> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<TaskState> {
            let key = task_key(&workflow_id, &task_id);
            let write_txn = db.begin_write().map_err(|e| store_err(e))?;
            let state = {
                let mut table = write_txn.open_table(TASKS).map_err(|e| store_err(e))?;
                let bytes = table
                    .get(key.as_str())
                    .map_err(|e| store_err(e))?
                    .ok_or_else(|| Error::TaskNotFound {
                        workflow_id: workflow_id.clone(),
                        task_id: task_id.clone(),
                    })?;
                let mut state: TaskState = decode(bytes.value())?;
                drop(bytes);
                state.status = status;
                state.updated_at = Utc::now();
                if let Some(refs) = output_refs {
                    state.output_refs = refs;
                }
                if error.is_some() {
                    state.error = error;
                }
                let bytes = encode(&state)?;
                table.insert(key.as_str(), bytes.as_slice()).map_err(|e| store_err(e))?;
                state
            };
            write_txn.commit().map_err(|e| store_err(e))?;
            Ok(state)
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn append_input_refs(
        &self,
        workflow_id: &str,
        task_id: &str,
        refs: Vec<DataReference>,
    ) -> Result<TaskState> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        let task_id = task_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<TaskState> {
            let key = task_key(&workflow_id, &task_id);
            let write_txn = db.begin_write().map_err(|e| store_err(e))?;
            let state = {
                let mut table = write_txn.open_table(TASKS).map_err(|e| store_err(e))?;
                let bytes = table
                    .get(key.as_str())
                    .map_err(|e| store_err(e))?
                    .ok_or_else(|| Error::TaskNotFound {
                        workflow_id: workflow_id.clone(),
                        task_id: task_id.clone(),
                    })?;
                let mut state: TaskState = decode(bytes.value())?;
                drop(bytes);
                state.input_refs.extend(refs);
                state.updated_at = Utc::now();
                let bytes = encode(&state)?;
                table.insert(key.as_str(), bytes.as_slice()).map_err(|e| store_err(e))?;
                state
            };
            write_txn.commit().map_err(|e| store_err(e))?;
            Ok(state)
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn get_workflow_tasks(&self, workflow_id: &str) -> Result<Vec<TaskState>> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<TaskState>> {
            let read_txn = db.begin_read().map_err(|e| store_err(e))?;
            let workflows = read_txn.open_table(WORKFLOWS).map_err(|e| store_err(e))?;
            if workflows.get(workflow_id.as_str()).map_err(|e| store_err(e))?.is_none() {
                return Err(Error::WorkflowNotFound {
                    workflow_id: workflow_id.clone(),
                });
            }
            let index = read_txn.open_table(TASK_INDEX).map_err(|e| store_err(e))?;
            let ids: Vec<String> = match index.get(workflow_id.as_str()).map_err(|e| store_err(e))? {
                Some(bytes) => decode(bytes.value())?,
                None => Vec::new(),
            };
            let tasks_table = read_txn.open_table(TASKS).map_err(|e| store_err(e))?;
            let mut tasks = Vec::new();
            for id in ids {
                let key = task_key(&workflow_id, &id);
                if let Some(bytes) = tasks_table.get(key.as_str()).map_err(|e| store_err(e))? {
                    tasks.push(decode::<TaskState>(bytes.value())?);
                }
            }
            tasks.sort_by_key(|t| t.created_at);
            Ok(tasks)
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn delete_workflow(&self, workflow_id: &str) -> Result<()> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write().map_err(|e| store_err(e))?;
            let ids: Vec<String> = {
                let mut index = write_txn.open_table(TASK_INDEX).map_err(|e| store_err(e))?;
                let ids = match index.remove(workflow_id.as_str()).map_err(|e| store_err(e))? {
                    Some(bytes) => decode(bytes.value())?,
                    None => Vec::new(),
                };
                ids
            };
            {
                let mut tasks = write_txn.open_table(TASKS).map_err(|e| store_err(e))?;
                let mut deps = write_txn.open_table(DEPS).map_err(|e| store_err(e))?;
                let mut dependents = write_txn.open_table(DEPENDENTS).map_err(|e| store_err(e))?;
                for id in &ids {
                    let key = task_key(&workflow_id, id);
                    tasks.remove(key.as_str()).map_err(|e| store_err(e))?;
                    deps.remove(key.as_str()).map_err(|e| store_err(e))?;
                    dependents.remove(key.as_str()).map_err(|e| store_err(e))?;
                }
            }
            {
                let mut endpoints = write_txn.open_table(ENDPOINTS).map_err(|e| store_err(e))?;
                endpoints.remove(workflow_id.as_str()).map_err(|e| store_err(e))?;
            }
            {
                let mut workflows = write_txn.open_table(WORKFLOWS).map_err(|e| store_err(e))?;
                workflows.remove(workflow_id.as_str()).map_err(|e| store_err(e))?;
            }
            write_txn.commit().map_err(|e| store_err(e))?;
            Ok(())
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn add_dep(&self, workflow_id: &str, task_id: &str, dep_task_id: &str) -> Result<()> {
        let db = self.db.clone();
        let key = task_key(workflow_id, task_id);
        let dep_task_id = dep_task_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write().map_err(|e| store_err(e))?;
            {
                let mut table = write_txn.open_table(DEPS).map_err(|e| store_err(e))?;
                let mut set: HashSet<String> = match table.get(key.as_str()).map_err(|e| store_err(e))? {
                    Some(bytes) => decode(bytes.value())?,
                    None => HashSet::new(),
                };
                set.insert(dep_task_id);
                let bytes = encode(&set)?;
                table.insert(key.as_str(), bytes.as_slice()).map_err(|e| store_err(e))?;
            }
            write_txn.commit().map_err(|e| store_err(e))?;
            Ok(())
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn add_dependent(
        &self,
        workflow_id: &str,
        task_id: &str,
        dependent_task_id: &str,
    ) -> Result<()> {
        let db = self.db.clone();
        let key = task_key(workflow_id, task_id);
        let dependent_task_id = dependent_task_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write().map_err(|e| store_err(e))?;
            {
                let mut table = write_txn.open_table(DEPENDENTS).map_err(|e| store_err(e))?;
                let mut set: HashSet<String> = match table.get(key.as_str()).map_err(|e| store_err(e))? {
                    Some(bytes) => decode(bytes.value())?,
                    None => HashSet::new(),
                };
                set.insert(dependent_task_id);
                let bytes = encode(&set)?;
                table.insert(key.as_str(), bytes.as_slice()).map_err(|e| store_err(e))?;
            }
            write_txn.commit().map_err(|e| store_err(e))?;
            Ok(())
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn remove_dep(
        &self,
        workflow_id: &str,
        task_id: &str,
        dep_task_id: &str,
    ) -> Result<usize> {
        let db = self.db.clone();
        let key = task_key(workflow_id, task_id);
        let dep_task_id = dep_task_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<usize> {
            let write_txn = db.begin_write().map_err(|e| store_err(e))?;
            let remaining = {
                let mut table = write_txn.open_table(DEPS).map_err(|e| store_err(e))?;
                let mut set: HashSet<String> = match table.get(key.as_str()).map_err(|e| store_err(e))? {
                    Some(bytes) => decode(bytes.value())?,
                    None => HashSet::new(),
                };
                set.remove(&dep_task_id);
                let remaining = set.len();
                let bytes = encode(&set)?;
                table.insert(key.as_str(), bytes.as_slice()).map_err(|e| store_err(e))?;
                remaining
            };
            write_txn.commit().map_err(|e| store_err(e))?;
            Ok(remaining)
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn dep_count(&self, workflow_id: &str, task_id: &str) -> Result<usize> {
        let db = self.db.clone();
        let key = task_key(workflow_id, task_id);
        tokio::task::spawn_blocking(move || -> Result<usize> {
            let read_txn = db.begin_read().map_err(|e| store_err(e))?;
            let table = read_txn.open_table(DEPS).map_err(|e| store_err(e))?;
            match table.get(key.as_str()).map_err(|e| store_err(e))? {
                Some(bytes) => Ok(decode::<HashSet<String>>(bytes.value())?.len()),
                None => Ok(0),
            }
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn dependents(&self, workflow_id: &str, task_id: &str) -> Result<Vec<String>> {
        let db = self.db.clone();
        let key = task_key(workflow_id, task_id);
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let read_txn = db.begin_read().map_err(|e| store_err(e))?;
            let table = read_txn.open_table(DEPENDENTS).map_err(|e| store_err(e))?;
            match table.get(key.as_str()).map_err(|e| store_err(e))? {
                Some(bytes) => Ok(decode::<HashSet<String>>(bytes.value())?.into_iter().collect()),
                None => Ok(Vec::new()),
            }
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn save_endpoints(
        &self,
        workflow_id: &str,
        endpoints: EndpointDirectory,
    ) -> Result<()> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let write_txn = db.begin_write().map_err(|e| store_err(e))?;
            {
                let mut table = write_txn.open_table(ENDPOINTS).map_err(|e| store_err(e))?;
                let bytes = encode(&endpoints)?;
                table
                    .insert(workflow_id.as_str(), bytes.as_slice())
                    .map_err(|e| store_err(e))?;
            }
            write_txn.commit().map_err(|e| store_err(e))?;
            Ok(())
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn get_endpoints(&self, workflow_id: &str) -> Result<EndpointDirectory> {
        let db = self.db.clone();
        let workflow_id = workflow_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<EndpointDirectory> {
            let read_txn = db.begin_read().map_err(|e| store_err(e))?;
            let table = read_txn.open_table(ENDPOINTS).map_err(|e| store_err(e))?;
            match table.get(workflow_id.as_str()).map_err(|e| store_err(e))? {
                Some(bytes) => decode(bytes.value()),
                None => Ok(EndpointDirectory::new()),
            }
        })
        .await
        .map_err(|e| store_err(e))?
    }

    async fn list_running_workflows(&self) -> Result<Vec<String>> {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<String>> {
            let read_txn = db.begin_read().map_err(|e| store_err(e))?;
            let table = read_txn.open_table(WORKFLOWS).map_err(|e| store_err(e))?;
            let mut running = Vec::new();
            for entry in table.iter().map_err(|e| store_err(e))? {
                let (_, bytes) = entry.map_err(|e| store_err(e))?;
                let state: WorkflowState = decode(bytes.value())?;
                if state.status == WorkflowStatus::Running {
                    running.push(state.workflow_id);
                }
            }
            Ok(running)
        })
        .await
        .map_err(|e| store_err(e))?
    }
}

//! Worker (C9): claims one task, drives it through the control protocol to
//! completion (including polling long-running tasks), and reports the
//! result back to the Engine.

use crate::control_client::{ControlClient, ExecuteStatus, PollStatus};
use crate::dataref::DataReference;
use crate::dockerinfo::EndpointDirectory;
use crate::engine::Engine;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("malformed node_key: {node_key}"))]
    MalformedNodeKey { node_key: String },

    #[snafu(display("Endpoint not found for: {container_name}"))]
    EndpointNotFound { container_name: String },

    #[snafu(display("control client error: {source}"))]
    Control { source: crate::control_client::Error },

    #[snafu(display("engine error: {source}"))]
    Engine { source: crate::engine::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Outcome of a single `process_task` pass, used by the run loop to decide
/// whether to keep going without waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Processed,
    QueueEmpty,
}

pub struct Worker {
    engine: Arc<Engine>,
    control: ControlClient,
    poll_interval: Duration,
}

impl Worker {
    #[must_use]
    pub fn new(engine: Arc<Engine>, control: ControlClient, poll_interval: Duration) -> Self {
        Self {
            engine,
            control,
            poll_interval,
        }
    }

    /// Claims and fully processes one task. `Ok(QueueEmpty)` means the
    /// queue had nothing to claim within `timeout`.
    pub async fn process_task(
        &self,
        workflow_id: &str,
        endpoints: &EndpointDirectory,
        timeout: Duration,
    ) -> Result<ProcessOutcome> {
        let Some(task) = self
            .engine
            .claim(workflow_id, timeout)
            .await
            .context(EngineSnafu)?
        else {
            return Ok(ProcessOutcome::QueueEmpty);
        };

        if let Err(err) = self.run_task(workflow_id, &task.task_id, &task.node_key, &task.input_refs, endpoints).await {
            let message = err.to_string();
            self.engine
                .fail(workflow_id, &task.task_id, &message)
                .await
                .context(EngineSnafu)?;
        }

        Ok(ProcessOutcome::Processed)
    }

    async fn run_task(
        &self,
        workflow_id: &str,
        task_id: &str,
        node_key: &str,
        input_refs: &[DataReference],
        endpoints: &EndpointDirectory,
    ) -> Result<()> {
        let (container_name, method) = parse_node_key(node_key)?;

        let endpoint = endpoints
            .get(container_name)
            .ok_or_else(|| Error::EndpointNotFound {
                container_name: container_name.to_string(),
            })?;
        let base_url = endpoint.base_url();

        let response = self
            .control
            .execute(&base_url, method, workflow_id, task_id, input_refs.to_vec())
            .await
            .context(ControlSnafu)?;

        match response.status {
            ExecuteStatus::Failed => {
                let error = response.error.unwrap_or_else(|| "unknown error".to_string());
                self.engine
                    .fail(workflow_id, task_id, &error)
                    .await
                    .context(EngineSnafu)?;
            }
            ExecuteStatus::Complete => {
                let outputs = response.output.into_iter().collect::<Vec<_>>();
                self.engine
                    .complete(workflow_id, task_id, Some(outputs))
                    .await
                    .context(EngineSnafu)?;
            }
            ExecuteStatus::Running => {
                let service_task_id = response.task_id.unwrap_or_else(|| task_id.to_string());
                self.poll_until_complete(workflow_id, task_id, &base_url, &service_task_id)
                    .await?;
            }
            ExecuteStatus::Unknown(raw) => {
                self.engine
                    .fail(workflow_id, task_id, &format!("Unknown status: {raw}"))
                    .await
                    .context(EngineSnafu)?;
            }
        }

        Ok(())
    }

    async fn poll_until_complete(
        &self,
        workflow_id: &str,
        task_id: &str,
        base_url: &str,
        service_task_id: &str,
    ) -> Result<()> {
        loop {
            let status = self
                .control
                .get_status(base_url, service_task_id)
                .await
                .context(ControlSnafu)?;

            match status.status {
                PollStatus::Complete => {
                    let output = self
                        .control
                        .get_output(base_url, service_task_id)
                        .await
                        .context(ControlSnafu)?;
                    self.engine
                        .complete(workflow_id, task_id, Some(vec![output.output]))
                        .await
                        .context(EngineSnafu)?;
                    return Ok(());
                }
                PollStatus::Failed => {
                    let error = status.error.unwrap_or_else(|| "unknown error".to_string());
                    self.engine
                        .fail(workflow_id, task_id, &error)
                        .await
                        .context(EngineSnafu)?;
                    return Ok(());
                }
                PollStatus::Running => {
                    tokio::time::sleep(self.poll_interval).await;
                }
                PollStatus::Unknown(raw) => {
                    self.engine
                        .fail(workflow_id, task_id, &format!("Unknown status: {raw}"))
                        .await
                        .context(EngineSnafu)?;
                    return Ok(());
                }
            }
        }
    }

    /// Processes tasks until the workflow completes. A zero `timeout`
    /// returns as soon as the queue is observed empty; a positive timeout
    /// relies on the blocking claim to wait for more work.
    pub async fn run(&self, workflow_id: &str, endpoints: &EndpointDirectory, timeout: Duration) -> Result<()> {
        loop {
            if self
                .engine
                .is_workflow_complete(workflow_id)
                .await
                .context(EngineSnafu)?
            {
                return Ok(());
            }

            match self.process_task(workflow_id, endpoints, timeout).await? {
                ProcessOutcome::Processed => {}
                ProcessOutcome::QueueEmpty => {
                    if timeout.is_zero() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

fn parse_node_key(node_key: &str) -> Result<(&str, &str)> {
    node_key
        .split_once(':')
        .filter(|(container, method)| !container.is_empty() && !method.is_empty())
        .ok_or_else(|| Error::MalformedNodeKey {
            node_key: node_key.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_node_key() {
        assert_eq!(parse_node_key("svc:Process").unwrap(), ("svc", "Process"));
    }

    #[test]
    fn rejects_node_key_without_colon() {
        assert!(matches!(
            parse_node_key("svcProcess"),
            Err(Error::MalformedNodeKey { .. })
        ));
    }

    #[test]
    fn rejects_node_key_with_empty_half() {
        assert!(matches!(parse_node_key(":Process"), Err(Error::MalformedNodeKey { .. })));
        assert!(matches!(parse_node_key("svc:"), Err(Error::MalformedNodeKey { .. })));
    }
}

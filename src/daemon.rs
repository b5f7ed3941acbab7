//! Worker Daemon (C11): process-level loop that scans the State Store for
//! running workflows and processes one task per pass per workflow.

use crate::store::StateStore;
use crate::worker::{ProcessOutcome, Worker};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct WorkerDaemon {
    store: Arc<dyn StateStore>,
    worker: Worker,
    poll_interval: Duration,
    running: AtomicBool,
}

impl WorkerDaemon {
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>, worker: Worker, poll_interval: Duration) -> Self {
        Self {
            store,
            worker,
            poll_interval,
            running: AtomicBool::new(true),
        }
    }

    /// Processes one ready task for `workflow_id`, returning `false` if
    /// the workflow has no endpoint directory (nothing to dispatch to
    /// yet) or its queue was empty.
    async fn process_workflow(&self, workflow_id: &str) -> bool {
        let endpoints = match self.store.get_endpoints(workflow_id).await {
            Ok(endpoints) if !endpoints.is_empty() => endpoints,
            Ok(_) => {
                tracing::warn!(workflow_id, "no endpoints for workflow, skipping");
                return false;
            }
            Err(err) => {
                tracing::error!(workflow_id, %err, "failed to load endpoints");
                return false;
            }
        };

        match self
            .worker
            .process_task(workflow_id, &endpoints, Duration::ZERO)
            .await
        {
            Ok(ProcessOutcome::Processed) => true,
            Ok(ProcessOutcome::QueueEmpty) => false,
            Err(err) => {
                tracing::error!(workflow_id, %err, "error processing workflow");
                false
            }
        }
    }

    /// Main daemon loop: repeatedly scans for running workflows and
    /// processes one task per pass per workflow, sleeping `poll_interval`
    /// only when nothing was processed. Runs until [`stop`] is called.
    ///
    /// [`stop`]: WorkerDaemon::stop
    pub async fn run(&self) {
        tracing::info!("worker daemon started, polling for tasks");

        while self.running.load(Ordering::SeqCst) {
            let workflows = match self.store.list_running_workflows().await {
                Ok(workflows) => workflows,
                Err(err) => {
                    tracing::error!(%err, "error listing running workflows");
                    tokio::time::sleep(self.poll_interval).await;
                    continue;
                }
            };

            let mut processed_any = false;
            for workflow_id in workflows {
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                if self.process_workflow(&workflow_id).await {
                    processed_any = true;
                    tracing::info!(workflow_id = workflow_id.as_str(), "processed task");
                }
            }

            if !processed_any {
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        tracing::info!("worker daemon stopped");
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_client::ControlClient;
    use crate::engine::Engine;
    use crate::queue::mem::InMemoryTaskQueue;
    use crate::queue::TaskQueue;
    use crate::store::mem::InMemoryStateStore;

    fn daemon() -> WorkerDaemon {
        let store: Arc<dyn StateStore> = Arc::new(InMemoryStateStore::new());
        let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryTaskQueue::new());
        let engine = Arc::new(Engine::new(store.clone(), queue.clone()));
        let control = ControlClient::new(Duration::from_secs(5)).unwrap();
        let worker = Worker::new(engine, control, Duration::from_millis(10));
        WorkerDaemon::new(store, worker, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn workflow_with_no_endpoints_is_skipped() {
        let daemon = daemon();
        assert!(!daemon.process_workflow("missing").await);
    }

    #[tokio::test]
    async fn stop_ends_the_run_loop() {
        let daemon = Arc::new(daemon());
        daemon.stop();
        let run = daemon.clone();
        tokio::time::timeout(Duration::from_secs(1), run.run())
            .await
            .expect("run loop should exit promptly once stopped");
    }
}

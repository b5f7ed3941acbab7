//! `worker`: run the worker daemon (C11) against the configured backend, or
//! (`worker-run`) drive a single workflow to completion, matching the
//! original `worker_cli.py` entry point.

use crate::config::{Backend, PipeworksConfig};
use crate::control_client::ControlClient;
use crate::daemon::WorkerDaemon;
use crate::dockerinfo::EndpointDirectory;
use crate::engine::Engine;
use crate::queue::mem::InMemoryTaskQueue;
use crate::queue::redb_queue::RedbTaskQueue;
use crate::queue::TaskQueue;
use crate::store::mem::InMemoryStateStore;
use crate::store::redb_store::RedbStateStore;
use crate::store::StateStore;
use crate::worker::Worker;
use clap::Parser;
use snafu::prelude::*;
use std::sync::Arc;
use std::time::Duration;

/// Status-poll cadence for a single `Worker`, distinct from
/// `WORKER_POLL_INTERVAL` (the daemon's idle rescan sleep, §6) — matches
/// the original `Worker.__init__(poll_interval=5.0)` default.
const DEFAULT_WORKER_POLL_INTERVAL_SECS: f64 = 5.0;

/// A CLI `--timeout` of `0` means block indefinitely (`worker_cli.py`'s
/// `0 = blocking`); there is no literal infinite `Duration`, so indefinite
/// waits are represented as a wait far longer than any real deployment.
const INDEFINITE_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 10);

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to open store at {path}: {source}"))]
    OpenStore {
        path: String,
        source: crate::store::Error,
    },

    #[snafu(display("failed to open queue at {path}: {source}"))]
    OpenQueue {
        path: String,
        source: crate::queue::Error,
    },

    #[snafu(display("failed to build control client: {source}"))]
    Control { source: crate::control_client::Error },

    #[snafu(display("No endpoints found for workflow {workflow_id}"))]
    NoEndpoints { workflow_id: String },

    #[snafu(display("failed to load endpoints for {workflow_id}: {source}"))]
    LoadEndpoints {
        workflow_id: String,
        source: crate::store::Error,
    },

    #[snafu(display("worker run failed: {source}"))]
    Run { source: crate::worker::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Override the configured idle rescan interval (`WORKER_POLL_INTERVAL`), in seconds
    #[arg(long)]
    pub poll_interval: Option<f64>,

    /// Request timeout for the control protocol, in seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,
}

pub async fn handle_worker(args: WorkerArgs, config: PipeworksConfig) -> Result<()> {
    let daemon_poll_interval = Duration::from_secs_f64(args.poll_interval.unwrap_or(config.worker_poll_interval));

    let (store, queue) = open_backend(&config)?;

    let engine = Arc::new(Engine::new(store.clone(), queue));
    let control = ControlClient::new(Duration::from_secs(args.request_timeout_secs)).context(ControlSnafu)?;
    let worker = Worker::new(
        engine,
        control,
        Duration::from_secs_f64(DEFAULT_WORKER_POLL_INTERVAL_SECS),
    );
    let daemon = Arc::new(WorkerDaemon::new(store, worker, daemon_poll_interval));

    let shutdown_daemon = daemon.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_daemon.stop();
    });

    daemon.run().await;
    Ok(())
}

/// Drives a single workflow's queue to completion, matching `worker_cli.py`'s
/// `workflow_id` positional argument.
#[derive(Parser, Debug)]
pub struct WorkerRunArgs {
    /// Workflow ID to process tasks for
    pub workflow_id: String,

    /// Blocking-pop timeout in seconds for waiting on tasks (0 = indefinite)
    #[arg(long, default_value_t = 0)]
    pub timeout: u64,

    /// Poll interval in seconds for async tasks
    #[arg(long, default_value_t = DEFAULT_WORKER_POLL_INTERVAL_SECS)]
    pub poll_interval: f64,

    /// Request timeout for the control protocol, in seconds
    #[arg(long, default_value_t = 30)]
    pub request_timeout_secs: u64,
}

pub async fn handle_worker_run(args: WorkerRunArgs, config: PipeworksConfig) -> Result<()> {
    let (store, queue) = open_backend(&config)?;

    let endpoints: EndpointDirectory = store
        .get_endpoints(&args.workflow_id)
        .await
        .context(LoadEndpointsSnafu {
            workflow_id: args.workflow_id.clone(),
        })?;
    ensure!(
        !endpoints.is_empty(),
        NoEndpointsSnafu {
            workflow_id: args.workflow_id.clone(),
        }
    );
    tracing::info!(count = endpoints.len(), "loaded service endpoints");

    let engine = Arc::new(Engine::new(store, queue));
    let control = ControlClient::new(Duration::from_secs(args.request_timeout_secs)).context(ControlSnafu)?;
    let worker = Worker::new(engine, control, Duration::from_secs_f64(args.poll_interval));

    let timeout = if args.timeout == 0 {
        INDEFINITE_TIMEOUT
    } else {
        Duration::from_secs(args.timeout)
    };

    tracing::info!(workflow_id = args.workflow_id.as_str(), "processing tasks");
    worker.run(&args.workflow_id, &endpoints, timeout).await.context(RunSnafu)?;
    tracing::info!("workflow complete");

    Ok(())
}

type Backends = (Arc<dyn StateStore>, Arc<dyn TaskQueue>);

fn open_backend(config: &PipeworksConfig) -> Result<Backends> {
    Ok(match config.backend() {
        Backend::Memory => (Arc::new(InMemoryStateStore::new()), Arc::new(InMemoryTaskQueue::new())),
        Backend::Redb(path) => {
            let db = Arc::new(redb::Database::create(&path).map_err(|e| Error::OpenStore {
                path: path.display().to_string(),
                source: crate::store::Error::Store { message: e.to_string() },
            })?);
            let store = RedbStateStore::from_db(db.clone()).context(OpenStoreSnafu {
                path: path.display().to_string(),
            })?;
            let queue = RedbTaskQueue::from_db(db).context(OpenQueueSnafu {
                path: path.display().to_string(),
            })?;
            (Arc::new(store), Arc::new(queue))
        }
    })
}

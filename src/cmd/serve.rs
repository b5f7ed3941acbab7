//! `serve`: run the admission API (C10) against the configured backend.

use crate::api::{self, AppState};
use crate::config::{Backend, PipeworksConfig};
use crate::engine::Engine;
use crate::queue::mem::InMemoryTaskQueue;
use crate::queue::redb_queue::RedbTaskQueue;
use crate::queue::TaskQueue;
use crate::store::mem::InMemoryStateStore;
use crate::store::redb_store::RedbStateStore;
use crate::store::StateStore;
use clap::Parser;
use snafu::prelude::*;
use std::sync::Arc;

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

    #[snafu(display("server error: {source}"))]
    Serve { source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct ServeArgs {
    /// Override the configured bind host
    #[arg(long)]
    pub host: Option<String>,

    /// Override the configured bind port
    #[arg(long)]
    pub port: Option<u16>,
}

pub async fn handle_serve(args: ServeArgs, config: PipeworksConfig) -> Result<()> {
    let host = args.host.unwrap_or(config.host.clone());
    let port = args.port.unwrap_or(config.port);

    let (store, queue): (Arc<dyn StateStore>, Arc<dyn TaskQueue>) = match config.backend() {
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
    };

    let engine = Arc::new(Engine::new(store.clone(), queue.clone()));
    let state = AppState { engine, store, queue };

    api::serve(state, &host, port).await.context(ServeSnafu)
}

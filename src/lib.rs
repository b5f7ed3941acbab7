//! # Pipeworks
//!
//! Pipeworks is a durable, DAG-based orchestrator for pipelines of
//! containerized services. A blueprint describes a graph of
//! `container:operation` nodes; a dockerinfo document resolves each
//! container to a network endpoint; the engine walks the graph, dispatching
//! each ready node to its service over a small HTTP control protocol and
//! propagating outputs to dependents as they complete.
//!
//! ## Core modules
//!
//! - [`dataref`] - typed references to data passed between tasks
//! - [`graph`] - the in-memory DAG built from a blueprint
//! - [`blueprint`] - blueprint parsing and graph construction
//! - [`dockerinfo`] - endpoint directory parsing
//! - [`state`] - shared workflow/task state types
//! - [`store`] - durable persistence of workflow/task state
//! - [`queue`] - per-workflow task queue
//! - [`engine`] - the orchestration algorithm
//! - [`control_client`] - the HTTP control protocol client
//! - [`worker`] - claims and drives individual tasks
//! - [`daemon`] - the worker daemon's polling loop
//! - [`api`] - the admission API
//! - [`config`] - layered configuration
//!
//! ## Configuration
//!
//! Pipeworks is configured via, from lowest to highest precedence:
//! compiled-in defaults, an optional `pipeworks.yaml`, then bare-named
//! environment variables (`REDIS_URL`, `HOST`, `PORT`, `LOG_LEVEL`,
//! `WORKER_POLL_INTERVAL`). See [`config::PipeworksConfig`].

pub mod api;
pub mod blueprint;
pub mod config;
pub mod control_client;
pub mod daemon;
pub mod dataref;
pub mod dockerinfo;
pub mod engine;
pub mod graph;
pub mod queue;
pub mod state;
pub mod store;
pub mod worker;

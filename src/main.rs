use clap::Parser;
use snafu::prelude::*;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod api;
mod blueprint;
mod cmd;
mod config;
mod control_client;
mod daemon;
mod dataref;
mod dockerinfo;
mod engine;
mod graph;
mod queue;
mod state;
mod store;
mod worker;

use cmd::{
    ServeArgs, ValidateArgs, WorkerArgs, WorkerRunArgs, handle_serve, handle_validate, handle_worker,
    handle_worker_run,
};
use config::PipeworksConfig;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Serve error: {source}"))]
    Serve { source: cmd::serve::Error },

    #[snafu(display("Worker error: {source}"))]
    Worker { source: cmd::worker::Error },

    #[snafu(display("Worker run error: {source}"))]
    WorkerRun { source: cmd::worker::Error },

    #[snafu(display("Validate error: {source}"))]
    Validate { source: cmd::validate::Error },
}

#[derive(Parser, Debug)]
#[command(name = "pipeworks")]
#[command(author = "Armin Graf")]
#[command(version = "0.1.0")]
#[command(about = "A durable, DAG-based orchestrator for containerized service pipelines", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Run the admission API
    Serve(ServeArgs),
    /// Run the worker daemon
    Worker(WorkerArgs),
    /// Process a single workflow's tasks to completion
    WorkerRun(WorkerRunArgs),
    /// Validate a blueprint/dockerinfo pair without submitting a workflow
    Validate(ValidateArgs),
}

fn init_tracing(log_level: &str) {
    let directive = match log_level {
        "warning" => "warn",
        other => other,
    };

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directive));

    tracing_subscriber::registry().with(filter_layer).with(tracing_subscriber::fmt::layer()).init();
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    let cli = Cli::parse();
    let config = PipeworksConfig::load().unwrap_or_default();
    init_tracing(&config.log_level);

    match cli.command {
        Commands::Serve(args) => handle_serve(args, config).await.context(ServeSnafu),
        Commands::Worker(args) => handle_worker(args, config).await.context(WorkerSnafu),
        Commands::WorkerRun(args) => handle_worker_run(args, config).await.context(WorkerRunSnafu),
        Commands::Validate(args) => handle_validate(args).await.context(ValidateSnafu),
    }
}

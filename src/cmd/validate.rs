//! `validate`: parse a blueprint + dockerinfo pair and report graph shape
//! without starting a workflow.

use clap::Parser;
use snafu::prelude::*;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("I/O error reading {path}: {source}"))]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("blueprint error: {source}"))]
    Blueprint { source: crate::blueprint::Error },

    #[snafu(display("dockerinfo error: {source}"))]
    Dockerinfo { source: crate::dockerinfo::Error },

    #[snafu(display("{count} node(s) reference containers missing from dockerinfo: {missing}"))]
    UnresolvedContainers { count: usize, missing: String },
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to the blueprint JSON file
    #[arg(long, value_name = "FILE")]
    pub blueprint: PathBuf,

    /// Path to the dockerinfo JSON file
    #[arg(long, value_name = "FILE")]
    pub dockerinfo: PathBuf,
}

pub async fn handle_validate(args: ValidateArgs) -> Result<()> {
    let blueprint_text = std::fs::read_to_string(&args.blueprint).context(IoSnafu {
        path: args.blueprint.clone(),
    })?;
    let dockerinfo_text = std::fs::read_to_string(&args.dockerinfo).context(IoSnafu {
        path: args.dockerinfo.clone(),
    })?;

    let graph = crate::blueprint::parse_str(&blueprint_text).context(BlueprintSnafu)?;
    let endpoints = crate::dockerinfo::parse_str(&dockerinfo_text).context(DockerinfoSnafu)?;

    let missing: Vec<&str> = graph
        .nodes
        .values()
        .map(|node| node.container_name.as_str())
        .filter(|name| !endpoints.contains_key(*name))
        .collect();

    if !missing.is_empty() {
        let mut missing = missing;
        missing.sort_unstable();
        missing.dedup();
        return Err(Error::UnresolvedContainers {
            count: missing.len(),
            missing: missing.join(", "),
        });
    }

    println!("{} node(s), {} start node(s), {} leaf node(s)", graph.nodes.len(), graph.start_keys.len(), graph.leaf_keys().len());
    println!("{} endpoint(s) resolved", endpoints.len());

    Ok(())
}

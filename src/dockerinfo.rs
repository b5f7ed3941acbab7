//! Parses a dockerinfo document into a `container_name -> ServiceEndpoint`
//! mapping (the Endpoint Directory, C4).

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashMap;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid JSON: {source}"))]
    InvalidJson { source: serde_json::Error },

    #[snafu(display("Invalid dockerinfo structure: {message}"))]
    InvalidStructure { message: String },

    #[snafu(display("Invalid port for {container_name}: {port}"))]
    InvalidPort { container_name: String, port: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Network endpoint for one container, resolved from dockerinfo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceEndpoint {
    pub address: String,
    pub port: u16,
}

impl ServiceEndpoint {
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

/// `container_name -> ServiceEndpoint`, persisted per-workflow.
pub type EndpointDirectory = HashMap<String, ServiceEndpoint>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DockerInfoEntry {
    container_name: String,
    ip_address: String,
    port: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DockerInfoSchema {
    docker_info_list: Vec<DockerInfoEntry>,
}

/// Parse dockerinfo from an already-decoded JSON value. Duplicate
/// `container_name` entries: last one wins, matching the source parser.
pub fn parse_json(data: serde_json::Value) -> Result<EndpointDirectory> {
    let schema: DockerInfoSchema =
        serde_json::from_value(data).map_err(|e| Error::InvalidStructure {
            message: e.to_string(),
        })?;

    ensure!(
        !schema.docker_info_list.is_empty(),
        InvalidStructureSnafu {
            message: "docker_info_list is required".to_string(),
        }
    );

    let mut endpoints = EndpointDirectory::new();
    for entry in schema.docker_info_list {
        ensure!(
            !entry.container_name.trim().is_empty(),
            InvalidStructureSnafu {
                message: "container_name is required".to_string(),
            }
        );
        ensure!(
            !entry.ip_address.trim().is_empty(),
            InvalidStructureSnafu {
                message: "ip_address is required".to_string(),
            }
        );
        let port: u16 = entry.port.parse().ok().filter(|p| *p > 0).context(
            InvalidPortSnafu {
                container_name: entry.container_name.clone(),
                port: entry.port.clone(),
            },
        )?;
        endpoints.insert(
            entry.container_name,
            ServiceEndpoint {
                address: entry.ip_address,
                port,
            },
        );
    }

    Ok(endpoints)
}

pub fn parse_str(data: &str) -> Result<EndpointDirectory> {
    let value: serde_json::Value = serde_json::from_str(data).context(InvalidJsonSnafu)?;
    parse_json(value)
}

//! Parses a submitted blueprint JSON document into a validated
//! [`ExecutionGraph`], per the schema and validation order of §4.1.

use crate::graph::{ExecutionGraph, GraphNode, OperationSignature, node_key};
use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Invalid JSON: {source}"))]
    InvalidJson { source: serde_json::Error },

    #[snafu(display("Invalid blueprint structure: {message}"))]
    InvalidStructure { message: String },

    #[snafu(display("Invalid connection target: {target}"))]
    InvalidConnectionTarget { target: String },

    #[snafu(display("No start nodes found"))]
    NoStartNodes,

    #[snafu(display("Circular dependency detected"))]
    CircularDependency,
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BpOperationSignature {
    operation_name: String,
    #[serde(default)]
    input_message_name: String,
    #[serde(default)]
    output_message_name: String,
    #[serde(default)]
    input_message_stream: bool,
    #[serde(default)]
    output_message_stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BpConnection {
    container_name: String,
    operation_signature: BpOperationSignature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BpOperationList {
    operation_signature: BpOperationSignature,
    #[serde(default)]
    connected_to: Vec<BpConnection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BpNode {
    container_name: String,
    proto_uri: String,
    image: String,
    node_type: String,
    operation_signature_list: Vec<BpOperationList>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BlueprintSchema {
    name: String,
    pipeline_id: String,
    creation_date: String,
    #[serde(rename = "type")]
    kind: String,
    version: String,
    nodes: Vec<BpNode>,
}

fn validate_schema(schema: &BlueprintSchema) -> Result<()> {
    let non_empty = [
        ("name", &schema.name),
        ("pipeline_id", &schema.pipeline_id),
        ("type", &schema.kind),
        ("version", &schema.version),
    ];
    for (field, value) in non_empty {
        ensure!(
            !value.trim().is_empty(),
            InvalidStructureSnafu {
                message: format!("{field} is required"),
            }
        );
    }
    ensure!(
        !schema.nodes.is_empty(),
        InvalidStructureSnafu {
            message: "nodes is required".to_string(),
        }
    );
    for node in &schema.nodes {
        let fields = [
            ("container_name", &node.container_name),
            ("proto_uri", &node.proto_uri),
            ("image", &node.image),
            ("node_type", &node.node_type),
        ];
        for (field, value) in fields {
            ensure!(
                !value.trim().is_empty(),
                InvalidStructureSnafu {
                    message: format!("{field} is required"),
                }
            );
        }
        ensure!(
            !node.operation_signature_list.is_empty(),
            InvalidStructureSnafu {
                message: "operation_signature_list is required".to_string(),
            }
        );
        for op in &node.operation_signature_list {
            ensure!(
                !op.operation_signature.operation_name.trim().is_empty(),
                InvalidStructureSnafu {
                    message: "operation_name is required".to_string(),
                }
            );
            for conn in &op.connected_to {
                ensure!(
                    !conn.container_name.trim().is_empty(),
                    InvalidStructureSnafu {
                        message: "container_name is required".to_string(),
                    }
                );
                ensure!(
                    !conn.operation_signature.operation_name.trim().is_empty(),
                    InvalidStructureSnafu {
                        message: "operation_name is required".to_string(),
                    }
                );
            }
        }
    }
    Ok(())
}

/// Parses a blueprint document (already decoded from JSON) into a validated,
/// cycle-free [`ExecutionGraph`] with start nodes designated.
pub fn parse_json(data: serde_json::Value) -> Result<ExecutionGraph> {
    let schema: BlueprintSchema =
        serde_json::from_value(data).map_err(|e| Error::InvalidStructure {
            message: e.to_string(),
        })?;

    validate_schema(&schema)?;
    validate_connections(&schema)?;
    let graph = build_graph(&schema)?;
    detect_cycles(&graph)?;

    Ok(graph)
}

pub fn parse_str(data: &str) -> Result<ExecutionGraph> {
    let value: serde_json::Value = serde_json::from_str(data).context(InvalidJsonSnafu)?;
    parse_json(value)
}

fn validate_connections(schema: &BlueprintSchema) -> Result<()> {
    let mut valid_targets: HashSet<String> = HashSet::new();
    for node in &schema.nodes {
        for op in &node.operation_signature_list {
            valid_targets.insert(node_key(
                &node.container_name,
                &op.operation_signature.operation_name,
            ));
        }
    }

    for node in &schema.nodes {
        for op in &node.operation_signature_list {
            for conn in &op.connected_to {
                let target = node_key(
                    &conn.container_name,
                    &conn.operation_signature.operation_name,
                );
                ensure!(
                    valid_targets.contains(&target),
                    InvalidConnectionTargetSnafu { target }
                );
            }
        }
    }
    Ok(())
}

fn build_graph(schema: &BlueprintSchema) -> Result<ExecutionGraph> {
    let mut graph = ExecutionGraph::default();

    // First pass: create every node, one GraphNode per operation-list entry.
    for node in &schema.nodes {
        for op in &node.operation_signature_list {
            let graph_node = GraphNode {
                container_name: node.container_name.clone(),
                proto_uri: node.proto_uri.clone(),
                image: node.image.clone(),
                node_type: node.node_type.clone(),
                operation: OperationSignature {
                    operation_name: op.operation_signature.operation_name.clone(),
                    input_message_name: op.operation_signature.input_message_name.clone(),
                    output_message_name: op.operation_signature.output_message_name.clone(),
                    input_message_stream: op.operation_signature.input_message_stream,
                    output_message_stream: op.operation_signature.output_message_stream,
                },
                next: Vec::new(),
                deps: Vec::new(),
            };
            graph.add_node(graph_node);
        }
    }

    // Second pass: wire edges in both directions.
    let mut edges: HashMap<String, Vec<String>> = HashMap::new();
    for node in &schema.nodes {
        for op in &node.operation_signature_list {
            let source_key = node_key(
                &node.container_name,
                &op.operation_signature.operation_name,
            );
            for conn in &op.connected_to {
                let target_key = node_key(
                    &conn.container_name,
                    &conn.operation_signature.operation_name,
                );
                edges.entry(source_key.clone()).or_default().push(target_key);
            }
        }
    }
    for (source_key, targets) in &edges {
        for target_key in targets {
            if let Some(source) = graph.nodes.get_mut(source_key) {
                source.next.push(target_key.clone());
            }
            if let Some(target) = graph.nodes.get_mut(target_key) {
                target.deps.push(source_key.clone());
            }
        }
    }

    let start_keys: Vec<String> = graph
        .nodes
        .values()
        .filter(|n| n.deps.is_empty())
        .map(GraphNode::key)
        .collect();
    ensure!(!start_keys.is_empty(), NoStartNodesSnafu);
    graph.start_keys = start_keys;

    Ok(graph)
}

fn detect_cycles(graph: &ExecutionGraph) -> Result<()> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut rec_stack: HashSet<String> = HashSet::new();

    fn has_cycle(
        graph: &ExecutionGraph,
        key: &str,
        visited: &mut HashSet<String>,
        rec_stack: &mut HashSet<String>,
    ) -> bool {
        visited.insert(key.to_string());
        rec_stack.insert(key.to_string());

        if let Some(node) = graph.get(key) {
            for next_key in &node.next {
                if !visited.contains(next_key) {
                    if has_cycle(graph, next_key, visited, rec_stack) {
                        return true;
                    }
                } else if rec_stack.contains(next_key) {
                    return true;
                }
            }
        }

        rec_stack.remove(key);
        false
    }

    for start in &graph.start_keys {
        if !visited.contains(start)
            && has_cycle(graph, start, &mut visited, &mut rec_stack)
        {
            return Err(Error::CircularDependency);
        }
    }
    Ok(())
}

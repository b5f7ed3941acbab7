//! In-memory DAG built from a parsed blueprint: `GraphNode`s keyed by
//! `container_name:operation_name`, wired with forward (`next`) and reverse
//! (`deps`) edges.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSignature {
    pub operation_name: String,
    #[serde(default)]
    pub input_message_name: String,
    #[serde(default)]
    pub output_message_name: String,
    #[serde(default)]
    pub input_message_stream: bool,
    #[serde(default)]
    pub output_message_stream: bool,
}

/// One vertex of the execution graph: a single operation on a single
/// container. `key` is the canonical node identifier used throughout the
/// engine (`container_name:operation_name`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub container_name: String,
    pub proto_uri: String,
    pub image: String,
    pub node_type: String,
    pub operation: OperationSignature,
    pub next: Vec<String>,
    pub deps: Vec<String>,
}

impl GraphNode {
    #[must_use]
    pub fn key(&self) -> String {
        node_key(&self.container_name, &self.operation.operation_name)
    }
}

#[must_use]
pub fn node_key(container_name: &str, operation_name: &str) -> String {
    format!("{container_name}:{operation_name}")
}

/// The full DAG for one blueprint, plus the nodes with no incoming deps.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionGraph {
    pub nodes: HashMap<String, GraphNode>,
    pub start_keys: Vec<String>,
}

impl ExecutionGraph {
    pub fn add_node(&mut self, node: GraphNode) {
        self.nodes.insert(node.key(), node);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&GraphNode> {
        self.nodes.get(key)
    }

    #[must_use]
    pub fn leaf_keys(&self) -> Vec<String> {
        self.nodes
            .values()
            .filter(|n| n.next.is_empty())
            .map(GraphNode::key)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, deps: &[&str], next: &[&str]) -> GraphNode {
        GraphNode {
            container_name: name.to_string(),
            proto_uri: "proto".to_string(),
            image: "image".to_string(),
            node_type: "service".to_string(),
            operation: OperationSignature {
                operation_name: "Process".to_string(),
                input_message_name: String::new(),
                output_message_name: String::new(),
                input_message_stream: false,
                output_message_stream: false,
            },
            deps: deps.iter().map(|s| node_key(s, "Process")).collect(),
            next: next.iter().map(|s| node_key(s, "Process")).collect(),
        }
    }

    #[test]
    fn key_is_container_colon_operation() {
        let n = node("svc", &[], &[]);
        assert_eq!(n.key(), "svc:Process");
    }

    #[test]
    fn start_keys_have_no_deps() {
        let mut graph = ExecutionGraph::default();
        graph.add_node(node("a", &[], &["b"]));
        graph.add_node(node("b", &["a"], &[]));
        graph.start_keys = graph
            .nodes
            .values()
            .filter(|n| n.deps.is_empty())
            .map(GraphNode::key)
            .collect();
        assert_eq!(graph.start_keys, vec!["a:Process".to_string()]);
    }
}

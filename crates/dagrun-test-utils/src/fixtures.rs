use std::io::Write;

use serde_json::{json, Value};
use tempfile::NamedTempFile;

use dagrun_core::graph::{Edge, GraphDocument, Node};

/// Fluent builder for graph fixtures.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(mut self, id: &str, kind: &str, config: Value) -> Self {
        self.nodes.push(Node::new(id, kind).with_config(config));
        self
    }

    pub fn trigger(self, id: &str) -> Self {
        self.node(id, "trigger", json!({}))
    }

    /// Script node with the given Rhai source.
    pub fn script(self, id: &str, source: &str) -> Self {
        self.node(id, "script", json!({ "script": source }))
    }

    pub fn edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    /// Unconditional edge.
    pub fn link(self, source: &str, target: &str) -> Self {
        self.edge(Edge::always(source, target))
    }

    pub fn build(self) -> GraphDocument {
        GraphDocument {
            version: 1.0,
            nodes: self.nodes,
            edges: self.edges,
        }
    }
}

/// Write `contents` to a temp file that lives as long as the handle.
pub fn write_temp_file(suffix: &str, contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

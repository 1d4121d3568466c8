use serde::{Deserialize, Serialize};

/// A workflow graph as handed to the engine. Immutable for the duration of a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Document format version. Any JSON number is accepted.
    #[serde(default = "default_version")]
    pub version: f64,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

fn default_version() -> f64 {
    1.0
}

impl GraphDocument {
    /// Parse a graph document from JSON text.
    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

/// A node in the workflow graph.
///
/// `config` is kept as raw JSON so `${NAME}` placeholders can be substituted
/// right before execution; it is parsed into a typed `NodeConfig` afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: String,
    /// Node kind (`http`, `script`, `map`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "empty_config")]
    pub config: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Node {
    /// Create a node with an empty config.
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            config: empty_config(),
            position: None,
        }
    }

    /// Set the raw config.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self
    }

    /// Human-readable name from `config.name`, falling back to `config.label`.
    pub fn display_name(&self) -> Option<String> {
        self.config
            .get("name")
            .or_else(|| self.config.get("label"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }
}

/// Canvas position; carried through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// An edge connecting two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Source node id.
    pub source: String,
    /// Target node id.
    pub target: String,
    /// Branch label (decision nodes).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EdgeData>,
}

/// Optional gating data attached to an edge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EdgeData {
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<EdgeKind>,
    /// Boolean expression over `output` and `status`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

/// Status-typed edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Success,
    Error,
}

impl Edge {
    /// Create an untyped, unguarded edge.
    pub fn always(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            label: None,
            data: None,
        }
    }

    /// Create an edge that fires only when the source succeeded.
    pub fn on_success(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::always(source, target).with_kind(EdgeKind::Success)
    }

    /// Create an edge that fires only when the source failed.
    pub fn on_error(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self::always(source, target).with_kind(EdgeKind::Error)
    }

    /// Create a guarded edge.
    pub fn guarded(
        source: impl Into<String>,
        target: impl Into<String>,
        guard: impl Into<String>,
    ) -> Self {
        let mut edge = Self::always(source, target);
        edge.data_mut().guard = Some(guard.into());
        edge
    }

    pub fn with_kind(mut self, kind: EdgeKind) -> Self {
        self.data_mut().kind = Some(kind);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn kind(&self) -> Option<EdgeKind> {
        self.data.as_ref().and_then(|d| d.kind)
    }

    pub fn guard(&self) -> Option<&str> {
        self.data.as_ref().and_then(|d| d.guard.as_deref())
    }

    fn data_mut(&mut self) -> &mut EdgeData {
        self.data.get_or_insert_with(EdgeData::default)
    }
}

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::time::Instant;
use tracing::warn;

use dagrun_core::graph::{Edge, GraphDocument, Node};
use dagrun_core::node::JoinPolicy;

/// Static shape of a graph, built once per run.
#[derive(Debug)]
pub struct Topology {
    nodes: Vec<Node>,
    index: HashMap<String, usize>,
    out_edges: HashMap<String, Vec<Edge>>,
    in_degree: HashMap<String, usize>,
}

impl Topology {
    /// Index nodes and edges. A repeated node id keeps its first declaration
    /// and edges with an unknown endpoint are dropped; the validator reports
    /// both before a run.
    pub fn new(graph: GraphDocument) -> Self {
        let mut nodes = Vec::with_capacity(graph.nodes.len());
        let mut index = HashMap::new();
        for node in graph.nodes {
            if index.contains_key(&node.id) {
                warn!(node_id = %node.id, "Duplicate node id ignored");
                continue;
            }
            index.insert(node.id.clone(), nodes.len());
            nodes.push(node);
        }

        let mut out_edges: HashMap<String, Vec<Edge>> = HashMap::new();
        let mut in_degree: HashMap<String, usize> = HashMap::new();
        for edge in graph.edges {
            if !index.contains_key(&edge.source) || !index.contains_key(&edge.target) {
                warn!(source = %edge.source, target = %edge.target, "Dangling edge ignored");
                continue;
            }
            *in_degree.entry(edge.target.clone()).or_default() += 1;
            out_edges.entry(edge.source.clone()).or_default().push(edge);
        }

        Self {
            nodes,
            index,
            out_edges,
            in_degree,
        }
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn outgoing(&self, id: &str) -> &[Edge] {
        self.out_edges.get(id).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn in_degree(&self, id: &str) -> usize {
        self.in_degree.get(id).copied().unwrap_or(0)
    }
}

/// Mutable bookkeeping for one run. Never shared between runs.
#[derive(Debug)]
pub struct RunState {
    outputs: HashMap<String, Value>,
    ready_counts: HashMap<String, usize>,
    required: HashMap<String, usize>,
    processed: HashSet<String>,
    queued: HashSet<String>,
    queue: VecDeque<String>,
    /// Distinct sources whose edges into a node fired, in firing order.
    fired_from: HashMap<String, Vec<String>>,
    started_at: Instant,
    total_cost: f64,
}

impl RunState {
    /// Compute required counts from each node's join policy and seed the
    /// queue with every node that needs no incoming edge.
    pub fn new(topology: &Topology) -> Self {
        let mut state = Self {
            outputs: HashMap::new(),
            ready_counts: HashMap::new(),
            required: HashMap::new(),
            processed: HashSet::new(),
            queued: HashSet::new(),
            queue: VecDeque::new(),
            fired_from: HashMap::new(),
            started_at: Instant::now(),
            total_cost: 0.0,
        };

        for node in topology.nodes() {
            let required = JoinPolicy::from_config(&node.config).required(topology.in_degree(&node.id));
            state.required.insert(node.id.clone(), required);
            if required == 0 {
                state.enqueue(&node.id);
            }
        }
        state
    }

    fn enqueue(&mut self, id: &str) {
        self.queued.insert(id.to_string());
        self.queue.push_back(id.to_string());
    }

    /// Pop the next node (FIFO) and mark it processed.
    pub fn dequeue(&mut self) -> Option<String> {
        let id = self.queue.pop_front()?;
        self.processed.insert(id.clone());
        Some(id)
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    pub fn record(&mut self, id: &str, output: Value, cost_usd: f64) {
        self.outputs.insert(id.to_string(), output);
        self.total_cost += cost_usd;
    }

    /// Count a fired edge. Returns true when this queued the target.
    pub fn fire(&mut self, source: &str, target: &str) -> bool {
        let count = self.ready_counts.entry(target.to_string()).or_default();
        *count += 1;
        let count = *count;

        if self.processed.contains(target) {
            return false;
        }
        let sources = self.fired_from.entry(target.to_string()).or_default();
        if !sources.iter().any(|s| s == source) {
            sources.push(source.to_string());
        }

        let required = self.required.get(target).copied().unwrap_or(0);
        if count >= required && !self.queued.contains(target) {
            self.enqueue(target);
            return true;
        }
        false
    }

    /// Input for a node about to run.
    ///
    /// Nodes without incoming edges get the run input. Otherwise a single
    /// fired source passes its output through as-is, and several fired
    /// sources are combined into an object keyed by source id.
    pub fn input_for(&self, id: &str, topology: &Topology, run_input: &Value) -> Value {
        let sources = self.fired_from.get(id).map(Vec::as_slice).unwrap_or_default();
        match sources {
            [] if topology.in_degree(id) == 0 => run_input.clone(),
            [] => Value::Null,
            [single] => self.output(single),
            many => {
                let merged: Map<String, Value> = many
                    .iter()
                    .map(|source| (source.clone(), self.output(source)))
                    .collect();
                Value::Object(merged)
            }
        }
    }

    pub fn output(&self, id: &str) -> Value {
        self.outputs.get(id).cloned().unwrap_or(Value::Null)
    }

    pub fn required(&self, id: &str) -> usize {
        self.required.get(id).copied().unwrap_or(0)
    }

    pub fn ready_count(&self, id: &str) -> usize {
        self.ready_counts.get(id).copied().unwrap_or(0)
    }

    pub fn is_processed(&self, id: &str) -> bool {
        self.processed.contains(id)
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }
}

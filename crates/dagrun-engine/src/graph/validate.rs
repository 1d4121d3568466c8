//! Pre-run graph checks.
//!
//! The scheduler trusts its input: it never re-checks ids, acyclicity, or
//! branch labels. Callers run these checks before handing a graph over.

use std::collections::{HashMap, HashSet, VecDeque};

use thiserror::Error;

use dagrun_core::error::{DagrunError, Result};
use dagrun_core::graph::GraphDocument;
use dagrun_core::node::{JoinPolicy, NodeConfig};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphIssue {
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    #[error("edge {index} references unknown source '{node}'")]
    UnknownSource { index: usize, node: String },

    #[error("edge {index} references unknown target '{node}'")]
    UnknownTarget { index: usize, node: String },

    #[error("graph contains a cycle through: {}", .0.join(", "))]
    Cycle(Vec<String>),

    #[error("node '{node}' requires {required} incoming edges but has {in_degree}")]
    JoinExceedsInDegree {
        node: String,
        required: usize,
        in_degree: usize,
    },

    #[error("edge {index} from decision node '{node}' has no branch label")]
    UnlabeledBranch { index: usize, node: String },

    #[error("edge {index} from decision node '{node}' uses undeclared branch '{label}'")]
    UnknownBranch {
        index: usize,
        node: String,
        label: String,
    },
}

/// Check a graph, returning every problem found.
pub fn validate(graph: &GraphDocument) -> Vec<GraphIssue> {
    let mut issues = Vec::new();

    let mut ids = HashSet::new();
    for node in &graph.nodes {
        if !ids.insert(node.id.as_str()) {
            issues.push(GraphIssue::DuplicateNode(node.id.clone()));
        }
    }

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut out_edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for (index, edge) in graph.edges.iter().enumerate() {
        let source_known = ids.contains(edge.source.as_str());
        let target_known = ids.contains(edge.target.as_str());
        if !source_known {
            issues.push(GraphIssue::UnknownSource {
                index,
                node: edge.source.clone(),
            });
        }
        if !target_known {
            issues.push(GraphIssue::UnknownTarget {
                index,
                node: edge.target.clone(),
            });
        }
        if source_known && target_known {
            *in_degree.entry(edge.target.as_str()).or_default() += 1;
            out_edges
                .entry(edge.source.as_str())
                .or_default()
                .push(edge.target.as_str());
        }
    }

    if let Some(cycle) = find_cycle(&ids, &in_degree, &out_edges) {
        issues.push(GraphIssue::Cycle(cycle));
    }

    for node in &graph.nodes {
        let degree = in_degree.get(node.id.as_str()).copied().unwrap_or(0);
        if let JoinPolicy::Count(required) = JoinPolicy::from_config(&node.config) {
            if required > degree {
                issues.push(GraphIssue::JoinExceedsInDegree {
                    node: node.id.clone(),
                    required,
                    in_degree: degree,
                });
            }
        }
    }

    for node in &graph.nodes {
        let Ok(NodeConfig::Decision(decision)) = NodeConfig::parse(&node.kind, node.config.clone())
        else {
            continue;
        };
        if decision.branches.is_empty() {
            continue;
        }
        for (index, edge) in graph.edges.iter().enumerate() {
            if edge.source != node.id {
                continue;
            }
            match &edge.label {
                None => issues.push(GraphIssue::UnlabeledBranch {
                    index,
                    node: node.id.clone(),
                }),
                Some(label) if !decision.branches.contains(label) => {
                    issues.push(GraphIssue::UnknownBranch {
                        index,
                        node: node.id.clone(),
                        label: label.clone(),
                    })
                }
                Some(_) => {}
            }
        }
    }

    issues
}

/// Kahn's algorithm. Returns the nodes left over when no zero in-degree
/// node remains, sorted for stable messages.
fn find_cycle(
    ids: &HashSet<&str>,
    in_degree: &HashMap<&str, usize>,
    out_edges: &HashMap<&str, Vec<&str>>,
) -> Option<Vec<String>> {
    let mut remaining: HashMap<&str, usize> = ids
        .iter()
        .map(|id| (*id, in_degree.get(id).copied().unwrap_or(0)))
        .collect();
    let mut ready: VecDeque<&str> = remaining
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();

    let mut visited = 0;
    while let Some(id) = ready.pop_front() {
        visited += 1;
        for &target in out_edges.get(id).into_iter().flatten() {
            if let Some(d) = remaining.get_mut(target) {
                *d -= 1;
                if *d == 0 {
                    ready.push_back(target);
                }
            }
        }
    }

    if visited == ids.len() {
        return None;
    }
    let mut stuck: Vec<String> = remaining
        .into_iter()
        .filter(|(_, d)| *d > 0)
        .map(|(id, _)| id.to_string())
        .collect();
    stuck.sort();
    Some(stuck)
}

/// `validate`, folded into a single error.
pub fn ensure_valid(graph: &GraphDocument) -> Result<()> {
    let issues = validate(graph);
    if issues.is_empty() {
        return Ok(());
    }
    let message = issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ");
    Err(DagrunError::Graph(message))
}

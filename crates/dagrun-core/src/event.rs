use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Ok,
    Error,
}

impl NodeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
        }
    }
}

/// One executed node. Never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepEvent {
    pub node_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: NodeStatus,
    pub input: Value,
    pub output: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(rename = "costUSD")]
    pub cost_usd: f64,
    /// Attempts made, including the successful one.
    pub attempts: u32,
}

impl StepEvent {
    pub fn is_ok(&self) -> bool {
        self.status == NodeStatus::Ok
    }
}

/// Terminal marker emitted once per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndEvent {
    pub ok: bool,
    pub run_id: String,
    /// The soft deadline stopped the run before the queue drained.
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub cancelled: bool,
    pub duration_ms: u64,
    #[serde(rename = "totalCostUSD")]
    pub total_cost_usd: f64,
}

/// Events produced by a run, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RunEvent {
    Step(StepEvent),
    End(EndEvent),
}

impl RunEvent {
    pub fn as_step(&self) -> Option<&StepEvent> {
        match self {
            Self::Step(step) => Some(step),
            Self::End(_) => None,
        }
    }

    pub fn as_end(&self) -> Option<&EndEvent> {
        match self {
            Self::End(end) => Some(end),
            Self::Step(_) => None,
        }
    }
}

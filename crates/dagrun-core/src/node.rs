//! Typed node configuration.
//!
//! A node's raw JSON config is parsed into one `NodeConfig` variant per kind
//! after secret substitution, so each executor only sees the fields it needs.
//! Common options (`retries`, `timeoutMs`, `join`) are read separately by
//! `NodeOptions` since they apply to every kind.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{DagrunError, Result};

/// Join policy controlling how many incoming edges must fire before a node is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinPolicy {
    /// Every incoming edge must fire.
    #[default]
    All,
    /// At least one incoming edge must fire.
    Any,
    /// Exactly N of the incoming edges.
    Count(usize),
}

impl JoinPolicy {
    /// Parse the `join` field of a node config. Unrecognized values fall back to `All`.
    pub fn from_config(config: &Value) -> Self {
        match config.get("join") {
            Some(Value::String(s)) => s.parse().unwrap_or_default(),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(|n| Self::Count(n as usize))
                .unwrap_or_default(),
            _ => Self::All,
        }
    }

    /// Number of fired incoming edges required, given the node's in-degree.
    /// Always within `0..=in_degree`.
    pub fn required(&self, in_degree: usize) -> usize {
        match self {
            Self::All => in_degree,
            Self::Any => in_degree.min(1),
            Self::Count(n) => in_degree.min(*n),
        }
    }
}

impl std::str::FromStr for JoinPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        match s.as_str() {
            "all" => Ok(Self::All),
            "any" => Ok(Self::Any),
            other => other
                .strip_prefix("count:")
                .and_then(|n| n.trim().parse::<usize>().ok())
                .map(Self::Count)
                .ok_or_else(|| format!("unknown join policy: {}", other)),
        }
    }
}

impl fmt::Display for JoinPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Any => write!(f, "any"),
            Self::Count(n) => write!(f, "count:{}", n),
        }
    }
}

/// Options shared by every node kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeOptions {
    /// Extra attempts after the first one.
    pub retries: u32,
    /// Upper bound for a single attempt.
    pub timeout_ms: Option<u64>,
    pub join: JoinPolicy,
}

impl NodeOptions {
    pub fn from_config(config: &Value) -> Self {
        let retries = config
            .get("retries")
            .and_then(Value::as_f64)
            .map(|r| r.max(0.0) as u32)
            .unwrap_or(0);
        let timeout_ms = config
            .get("timeoutMs")
            .and_then(Value::as_f64)
            .filter(|t| *t > 0.0)
            .map(|t| t as u64);
        Self {
            retries,
            timeout_ms,
            join: JoinPolicy::from_config(config),
        }
    }

    /// Total number of attempts.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Typed configuration, one variant per node kind.
#[derive(Debug, Clone)]
pub enum NodeConfig {
    Trigger,
    Http(HttpConfig),
    Script(ScriptConfig),
    Map(MapConfig),
    Delay(DelayConfig),
    Knowledge(KnowledgeConfig),
    Slack(SlackMessage),
    Chat(ChatMessage),
    Email(EmailMessage),
    Automation(AutomationConfig),
    Decision(DecisionConfig),
    /// Unknown node type; succeeds without doing anything.
    Passthrough,
}

impl NodeConfig {
    /// Parse a resolved config for the given node kind.
    pub fn parse(kind: &str, config: Value) -> Result<Self> {
        let parsed = match kind.to_lowercase().as_str() {
            "trigger" | "input" | "manual" | "webhook_trigger" => Self::Trigger,
            "http" | "http_request" | "network" => Self::Http(typed(kind, config)?),
            "script" | "code" | "transform" => Self::Script(typed(kind, config)?),
            "map" | "loop" | "foreach" => Self::Map(typed(kind, config)?),
            "delay" | "wait" => Self::Delay(typed(kind, config)?),
            "knowledge" | "kb" | "retrieve" => Self::Knowledge(typed(kind, config)?),
            "slack" => Self::Slack(typed(kind, config)?),
            "chat" | "webhook" | "discord" | "teams" => Self::Chat(typed(kind, config)?),
            "email" => Self::Email(typed(kind, config)?),
            "browser" | "automation" => Self::Automation(typed(kind, config)?),
            "decision" | "if" | "switch" | "branch" => Self::Decision(typed(kind, config)?),
            _ => Self::Passthrough,
        };
        Ok(parsed)
    }

    /// Short name used in logs and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Trigger => "trigger",
            Self::Http(_) => "http",
            Self::Script(_) => "script",
            Self::Map(_) => "map",
            Self::Delay(_) => "delay",
            Self::Knowledge(_) => "knowledge",
            Self::Slack(_) => "slack",
            Self::Chat(_) => "chat",
            Self::Email(_) => "email",
            Self::Automation(_) => "automation",
            Self::Decision(_) => "decision",
            Self::Passthrough => "passthrough",
        }
    }
}

fn typed<T: DeserializeOwned>(kind: &str, config: Value) -> Result<T> {
    serde_json::from_value(config).map_err(|e| DagrunError::NodeConfig {
        kind: kind.to_string(),
        message: e.to_string(),
    })
}

/// Network call.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Strings are sent verbatim; anything else is sent as JSON.
    #[serde(default)]
    pub body: Option<Value>,
}

fn default_method() -> String {
    "GET".into()
}

/// Sandboxed script.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptConfig {
    #[serde(alias = "code", alias = "source")]
    pub script: String,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// Bounded-iteration map.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapConfig {
    /// Defaults to the upstream output when that is a list.
    #[serde(default)]
    pub items: Option<Vec<Value>>,
    /// Script applied per item with `item`, `index`, `input` in scope.
    /// Missing mapper means identity.
    #[serde(default)]
    pub mapper: Option<String>,
    #[serde(default = "default_max_concurrent", alias = "maxConcurrency")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_max_concurrent() -> usize {
    4
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DelayConfig {
    #[serde(default)]
    pub ms: u64,
}

/// Knowledge lookup.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeConfig {
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default = "default_top_k", alias = "k")]
    pub top_k: usize,
    /// Overrides the engine-wide corpus.
    #[serde(default)]
    pub documents: Option<Vec<KnowledgeDocument>>,
}

fn default_top_k() -> usize {
    3
}

/// A document in the in-memory knowledge corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDocument {
    pub title: String,
    #[serde(alias = "content", alias = "text")]
    pub body: String,
}

/// Slack `chat.postMessage`.
#[derive(Debug, Clone, Deserialize)]
pub struct SlackMessage {
    pub channel: String,
    /// Falls back to the node input when absent.
    #[serde(default, alias = "message")]
    pub text: Option<String>,
}

/// Generic chat webhook (Discord/Teams/Mattermost-style).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(alias = "webhookUrl")]
    pub url: String,
    #[serde(default, alias = "message")]
    pub text: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmailMessage {
    #[serde(deserialize_with = "one_or_many")]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default, alias = "text", alias = "message")]
    pub body: Option<String>,
    #[serde(default)]
    pub html: bool,
}

/// Browser-style automation request.
#[derive(Debug, Clone, Deserialize)]
pub struct AutomationConfig {
    #[serde(default = "default_action")]
    pub action: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub steps: Vec<Value>,
}

fn default_action() -> String {
    "navigate".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DecisionConfig {
    /// Declared branch labels; checked by the graph validator only.
    #[serde(default)]
    pub branches: Vec<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => s
            .split(',')
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect(),
        OneOrMany::Many(v) => v,
    })
}

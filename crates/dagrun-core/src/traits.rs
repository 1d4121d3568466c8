use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Variables visible to a script.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptScope {
    vars: Vec<(String, Value)>,
}

impl ScriptScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable. Later bindings shadow earlier ones.
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.vars.push((name.into(), value));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn vars(&self) -> &[(String, Value)] {
        &self.vars
    }
}

/// Script execution capability.
///
/// The engine only depends on this trait; whether scripts run isolated or
/// inline is decided by whoever builds the registry.
pub trait ScriptRunner: Send + Sync + 'static {
    /// Runner name for logs.
    fn name(&self) -> &str;

    /// Evaluate `script` with `scope` bound; the final expression is the result.
    fn run(
        &self,
        script: String,
        scope: ScriptScope,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Value>>;

    /// Whether the timeout is actually enforced.
    fn is_isolated(&self) -> bool {
        true
    }
}

/// A message handed to a connector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// Channel id, email recipients, etc.
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub subject: Option<String>,
    pub text: String,
    #[serde(default)]
    pub html: bool,
    /// Per-message endpoint (chat webhooks).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

/// Messaging/notification connector (Slack, chat webhook, email).
pub trait Connector: Send + Sync + 'static {
    /// Connector name (e.g., "slack", "email").
    fn name(&self) -> &str;

    /// Deliver a message, returning a provider receipt.
    fn send(&self, message: OutboundMessage) -> BoxFuture<'_, Result<Value>>;
}

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use dagrun_core::config::{EngineConfig, SandboxConfig, SandboxMode};
use dagrun_core::error::Result;
use dagrun_core::node::{KnowledgeDocument, NodeConfig};
use dagrun_core::security::EgressPolicy;
use dagrun_core::traits::{Connector, ScriptRunner};

use crate::builtin::{automation, delay, http, knowledge, map, messaging, script};
use crate::connectors::{EmailConnector, SlackConnector, WebhookConnector};
use crate::sandbox::{DirectRunner, IsolatedRunner, SandboxLimits};

/// Result of a single node attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutput {
    pub value: Value,
    pub cost_usd: f64,
}

impl NodeOutput {
    /// Output of a node that does not incur cost.
    pub fn free(value: Value) -> Self {
        Self {
            value,
            cost_usd: 0.0,
        }
    }
}

/// Everything node executors need, shared read-only across a run.
pub struct NodeRegistry {
    runner: Arc<dyn ScriptRunner>,
    sandbox: SandboxConfig,
    egress: EgressPolicy,
    http: reqwest::Client,
    connectors: HashMap<String, Arc<dyn Connector>>,
    knowledge: Vec<KnowledgeDocument>,
    automation_enabled: bool,
}

impl NodeRegistry {
    /// Registry with every capability taken from the engine config.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        NodeRegistryBuilder::new(config).build()
    }

    pub fn builder(config: &EngineConfig) -> NodeRegistryBuilder {
        NodeRegistryBuilder::new(config)
    }

    pub fn egress(&self) -> &EgressPolicy {
        &self.egress
    }

    pub fn script_runner(&self) -> &dyn ScriptRunner {
        self.runner.as_ref()
    }

    /// Get a connector by name.
    pub fn connector(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.connectors.get(name).cloned()
    }

    /// List registered connector names.
    pub fn connectors(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.connectors.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Run one attempt of a node. Retries and timeouts are the caller's job.
    pub async fn execute(&self, config: &NodeConfig, input: &Value) -> Result<NodeOutput> {
        debug!(kind = config.kind_name(), "Executing node");

        let value = match config {
            NodeConfig::Trigger => input.clone(),
            NodeConfig::Http(cfg) => http::execute(&self.http, &self.egress, cfg).await?,
            NodeConfig::Script(cfg) => {
                script::execute(self.runner.as_ref(), &self.sandbox, cfg, input).await?
            }
            NodeConfig::Map(cfg) => {
                map::execute(self.runner.as_ref(), &self.sandbox, cfg, input).await?
            }
            NodeConfig::Delay(cfg) => delay::execute(cfg).await,
            NodeConfig::Knowledge(cfg) => knowledge::execute(cfg, &self.knowledge, input),
            NodeConfig::Slack(cfg) => {
                self.deliver("slack", messaging::slack_message(cfg, input))
                    .await?
            }
            NodeConfig::Chat(cfg) => {
                self.deliver("chat", messaging::chat_message(cfg, input))
                    .await?
            }
            NodeConfig::Email(cfg) => {
                self.deliver("email", messaging::email_message(cfg, input))
                    .await?
            }
            NodeConfig::Automation(cfg) => automation::execute(self.automation_enabled, cfg),
            NodeConfig::Decision(_) => input.clone(),
            NodeConfig::Passthrough => json!({ "ok": true }),
        };

        Ok(NodeOutput::free(value))
    }

    async fn deliver(
        &self,
        name: &str,
        message: dagrun_core::traits::OutboundMessage,
    ) -> Result<Value> {
        let connector = self.connector(name);
        messaging::deliver(connector.as_deref(), name, message).await
    }
}

/// Builds a [`NodeRegistry`], letting callers swap in their own runner,
/// HTTP client, or connectors.
pub struct NodeRegistryBuilder {
    config: EngineConfig,
    runner: Option<Arc<dyn ScriptRunner>>,
    http: Option<reqwest::Client>,
    connectors: Vec<Arc<dyn Connector>>,
}

impl NodeRegistryBuilder {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            runner: None,
            http: None,
            connectors: Vec::new(),
        }
    }

    pub fn script_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http = Some(client);
        self
    }

    /// Register a connector, replacing any configured one with the same name.
    pub fn connector(mut self, connector: impl Connector) -> Self {
        self.connectors.push(Arc::new(connector));
        self
    }

    pub fn egress(mut self, policy: EgressPolicy) -> Self {
        self.config.egress.policy = policy;
        self
    }

    pub fn build(self) -> Result<NodeRegistry> {
        let config = self.config;

        let http = match self.http {
            Some(client) => client,
            None => http::egress_client(
                &config.egress.policy,
                Duration::from_millis(config.egress.request_timeout_ms),
            )?,
        };

        let runner = self.runner.unwrap_or_else(|| {
            let limits = SandboxLimits::from(&config.sandbox);
            match config.sandbox.mode {
                SandboxMode::Isolated => Arc::new(IsolatedRunner::new(limits)),
                SandboxMode::Direct => Arc::new(DirectRunner::new(limits)),
            }
        });

        let egress = config.egress.policy.clone();
        let mut connectors: HashMap<String, Arc<dyn Connector>> = HashMap::new();
        let mut register = |connector: Arc<dyn Connector>| {
            connectors.insert(connector.name().to_string(), connector);
        };

        register(Arc::new(WebhookConnector::new(egress.clone(), http.clone())));
        if let Some(slack) = &config.connectors.slack {
            register(Arc::new(SlackConnector::new(slack.clone(), http.clone())));
        }
        if let Some(email) = &config.connectors.email {
            register(Arc::new(EmailConnector::new(email.clone(), http.clone())));
        }
        for connector in self.connectors {
            register(connector);
        }

        debug!(
            runner = runner.name(),
            connectors = connectors.len(),
            "Node registry ready"
        );

        Ok(NodeRegistry {
            runner,
            sandbox: config.sandbox,
            egress,
            http,
            connectors,
            knowledge: config.knowledge.documents,
            automation_enabled: config.automation.enabled,
        })
    }
}

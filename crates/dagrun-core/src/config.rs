use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DagrunError, Result};
use crate::node::KnowledgeDocument;
use crate::security::EgressPolicy;

/// Top-level engine configuration (`dagrun.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub egress: EgressConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub automation: AutomationSettings,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub knowledge: KnowledgeSettings,
}

/// Run-level budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Soft wall-clock budget, checked between nodes.
    #[serde(default = "default_max_runtime_ms")]
    pub max_runtime_ms: u64,
    /// Retry delay is `backoff_base_ms * 2^attempt`.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_runtime_ms: default_max_runtime_ms(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_max_runtime_ms() -> u64 { 120_000 }
fn default_backoff_base_ms() -> u64 { 200 }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EgressConfig {
    #[serde(flatten)]
    pub policy: EgressPolicy,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for EgressConfig {
    fn default() -> Self {
        Self {
            policy: EgressPolicy::default(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 { 30_000 }

/// How user scripts are executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Fresh interpreter per call on a blocking thread, deadline enforced.
    #[default]
    Isolated,
    /// Inline evaluation without timeout enforcement. Trusted/test use only.
    Direct,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: SandboxMode,
    #[serde(default = "default_script_timeout_ms")]
    pub default_timeout_ms: u64,
    /// Requested timeouts are clamped to this.
    #[serde(default = "default_script_timeout_ms")]
    pub max_timeout_ms: u64,
    #[serde(default = "default_max_operations")]
    pub max_operations: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            default_timeout_ms: default_script_timeout_ms(),
            max_timeout_ms: default_script_timeout_ms(),
            max_operations: default_max_operations(),
        }
    }
}

fn default_script_timeout_ms() -> u64 { 2_000 }
fn default_max_operations() -> u64 { 10_000_000 }

impl SandboxConfig {
    /// Clamp a requested script timeout into `1..=max_timeout_ms`.
    pub fn clamp_timeout(&self, requested: Option<u64>) -> u64 {
        let max = self.max_timeout_ms.max(1);
        requested
            .unwrap_or(self.default_timeout_ms)
            .clamp(1, max)
    }
}

/// Capability flag for browser-style automation nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AutomationSettings {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectorsConfig {
    #[serde(default)]
    pub slack: Option<SlackConnectorConfig>,
    #[serde(default)]
    pub email: Option<EmailConnectorConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConnectorConfig {
    pub bot_token: String,
    #[serde(default = "default_slack_api")]
    pub api_base: String,
}

fn default_slack_api() -> String { "https://slack.com/api".to_string() }

/// HTTP email API (Resend-compatible JSON body).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConnectorConfig {
    #[serde(default = "default_email_api")]
    pub api_url: String,
    pub api_key: String,
    pub from: String,
}

fn default_email_api() -> String { "https://api.resend.com/emails".to_string() }

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KnowledgeSettings {
    #[serde(default)]
    pub documents: Vec<KnowledgeDocument>,
}

impl EngineConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| DagrunError::ConfigNotFound(path.display().to_string()))?;

        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(&content);

        toml::from_str(&expanded).map_err(|e| DagrunError::Config(e.to_string()))
    }

    /// Load the file if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_DAGRUN_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_DAGRUN_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_DAGRUN_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_DAGRUN_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_DAGRUN_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config: EngineConfig = toml::from_str("").unwrap();
        assert_eq!(config.run.max_runtime_ms, 120_000);
        assert_eq!(config.run.backoff_base_ms, 200);
        assert_eq!(config.egress.policy.max_body_bytes, 1_000_000);
        assert_eq!(config.egress.policy.allowed_hosts, EgressPolicy::default_hosts());
        assert_eq!(config.sandbox.mode, SandboxMode::Isolated);
        assert_eq!(config.sandbox.default_timeout_ms, 2_000);
        assert!(!config.automation.enabled);
        assert!(config.connectors.slack.is_none());
        assert!(config.knowledge.documents.is_empty());
    }

    #[test]
    fn test_full_config() {
        let toml_str = r#"
[run]
max_runtime_ms = 5000
backoff_base_ms = 50

[egress]
allowed_hosts = ["internal.example"]
max_body_bytes = 2048
request_timeout_ms = 1000

[sandbox]
mode = "direct"
max_timeout_ms = 500

[automation]
enabled = true

[connectors.slack]
bot_token = "xoxb-test"

[connectors.email]
api_key = "re_test"
from = "bot@example.com"

[[knowledge.documents]]
title = "Refunds"
body = "Refunds are issued within 14 days."
"#;
        let config: EngineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.run.max_runtime_ms, 5000);
        assert_eq!(config.run.backoff_base_ms, 50);
        assert_eq!(config.egress.policy.allowed_hosts, vec!["internal.example"]);
        assert_eq!(config.egress.policy.max_body_bytes, 2048);
        assert_eq!(config.egress.request_timeout_ms, 1000);
        assert_eq!(config.sandbox.mode, SandboxMode::Direct);
        assert_eq!(config.sandbox.max_timeout_ms, 500);
        assert!(config.automation.enabled);
        let slack = config.connectors.slack.unwrap();
        assert_eq!(slack.api_base, "https://slack.com/api");
        let email = config.connectors.email.unwrap();
        assert_eq!(email.api_url, "https://api.resend.com/emails");
        assert_eq!(config.knowledge.documents[0].title, "Refunds");
    }

    #[test]
    fn test_clamp_timeout() {
        let sandbox = SandboxConfig::default();
        assert_eq!(sandbox.clamp_timeout(None), 2_000);
        assert_eq!(sandbox.clamp_timeout(Some(50)), 50);
        assert_eq!(sandbox.clamp_timeout(Some(60_000)), 2_000);
        assert_eq!(sandbox.clamp_timeout(Some(0)), 1);
    }

    #[test]
    fn test_load_from_file_expands_env() {
        std::env::set_var("TEST_DAGRUN_SLACK_TOKEN", "xoxb-from-env");
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"[connectors.slack]\nbot_token = \"${TEST_DAGRUN_SLACK_TOKEN}\"\n")
            .expect("write toml");
        let config = EngineConfig::load(tmp.path()).expect("load config");
        assert_eq!(config.connectors.slack.unwrap().bot_token, "xoxb-from-env");
        std::env::remove_var("TEST_DAGRUN_SLACK_TOKEN");
    }

    #[test]
    fn test_missing_file() {
        let path = Path::new("/definitely/not/here/dagrun.toml");
        assert!(matches!(
            EngineConfig::load(path),
            Err(DagrunError::ConfigNotFound(_))
        ));
        assert!(EngineConfig::load_or_default(path).is_ok());
    }
}

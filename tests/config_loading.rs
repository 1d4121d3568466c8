use std::io::Write;

use dagrun_core::config::{EngineConfig, SandboxMode};

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[run]
max_runtime_ms = 30000
backoff_base_ms = 50

[egress]
allowed_hosts = ["api.example.com", "internal.test"]
max_body_bytes = 2048
request_timeout_ms = 5000

[sandbox]
mode = "direct"
default_timeout_ms = 500
max_timeout_ms = 1500
max_operations = 1000

[automation]
enabled = true

[connectors.slack]
bot_token = "xoxb-test"

[connectors.email]
api_key = "re_test"
from = "flows@example.com"

[[knowledge.documents]]
title = "Refunds"
body = "Refunds take 14 days."
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.run.max_runtime_ms, 30000);
    assert_eq!(config.run.backoff_base_ms, 50);
    assert_eq!(
        config.egress.policy.allowed_hosts,
        vec!["api.example.com", "internal.test"]
    );
    assert_eq!(config.egress.policy.max_body_bytes, 2048);
    assert_eq!(config.egress.request_timeout_ms, 5000);
    assert_eq!(config.sandbox.mode, SandboxMode::Direct);
    assert_eq!(config.sandbox.clamp_timeout(None), 500);
    assert_eq!(config.sandbox.clamp_timeout(Some(10_000)), 1500);
    assert!(config.automation.enabled);

    let slack = config.connectors.slack.expect("slack present");
    assert_eq!(slack.bot_token, "xoxb-test");
    assert_eq!(slack.api_base, "https://slack.com/api");

    let email = config.connectors.email.expect("email present");
    assert_eq!(email.api_url, "https://api.resend.com/emails");
    assert_eq!(email.from, "flows@example.com");

    assert_eq!(config.knowledge.documents.len(), 1);
    assert_eq!(config.knowledge.documents[0].title, "Refunds");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("DAGRUN_TEST_SLACK_TOKEN", "xoxb-expanded");

    let toml_content = r#"
[connectors.slack]
bot_token = "${DAGRUN_TEST_SLACK_TOKEN}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.connectors.slack.unwrap().bot_token, "xoxb-expanded");

    std::env::remove_var("DAGRUN_TEST_SLACK_TOKEN");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[automation]\nenabled = false\n").expect("write toml");

    let config = EngineConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.run.max_runtime_ms, 120_000);
    assert_eq!(config.run.backoff_base_ms, 200);
    assert_eq!(config.egress.policy.max_body_bytes, 1_000_000);
    assert!(config
        .egress
        .policy
        .allowed_hosts
        .contains(&"api.github.com".to_string()));
    assert_eq!(config.sandbox.mode, SandboxMode::Isolated);
    assert_eq!(config.sandbox.clamp_timeout(Some(60_000)), 2000);
    assert!(config.connectors.slack.is_none());
    assert!(config.connectors.email.is_none());
    assert!(config.knowledge.documents.is_empty());
}

#[test]
fn test_missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = EngineConfig::load_or_default(&dir.path().join("absent.toml")).expect("defaults");
    assert_eq!(config.run.max_runtime_ms, 120_000);

    assert!(EngineConfig::load(&dir.path().join("absent.toml")).is_err());
}

#[test]
fn test_config_roundtrips_through_toml() {
    let config = EngineConfig::default();
    let text = toml::to_string_pretty(&config).expect("serialize");
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(text.as_bytes()).expect("write toml");

    let back = EngineConfig::load(tmp.path()).expect("reload");
    assert_eq!(back.egress.policy, config.egress.policy);
    assert_eq!(back.run.max_runtime_ms, config.run.max_runtime_ms);
}

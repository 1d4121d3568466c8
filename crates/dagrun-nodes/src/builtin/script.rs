use std::time::Duration;

use serde_json::Value;

use dagrun_core::config::SandboxConfig;
use dagrun_core::error::Result;
use dagrun_core::node::ScriptConfig;
use dagrun_core::traits::{ScriptRunner, ScriptScope};

/// Run a script node with `input` bound to the upstream output.
pub async fn execute(
    runner: &dyn ScriptRunner,
    sandbox: &SandboxConfig,
    config: &ScriptConfig,
    input: &Value,
) -> Result<Value> {
    let timeout = Duration::from_millis(sandbox.clamp_timeout(config.timeout_ms));
    let scope = ScriptScope::new().with("input", input.clone());
    runner.run(config.script.clone(), scope, timeout).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::IsolatedRunner;
    use serde_json::json;

    #[tokio::test]
    async fn test_script_sees_input() {
        let cfg = ScriptConfig {
            script: "input.items.len() * 10".into(),
            timeout_ms: None,
        };
        let out = execute(
            &IsolatedRunner::default(),
            &SandboxConfig::default(),
            &cfg,
            &json!({ "items": [1, 2, 3] }),
        )
        .await
        .unwrap();
        assert_eq!(out, json!(30));
    }

    #[tokio::test]
    async fn test_requested_timeout_is_clamped() {
        let sandbox = SandboxConfig {
            max_timeout_ms: 30,
            ..SandboxConfig::default()
        };
        let cfg = ScriptConfig {
            script: "loop {}".into(),
            timeout_ms: Some(60_000),
        };
        let started = std::time::Instant::now();
        let err = execute(&IsolatedRunner::default(), &sandbox, &cfg, &Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out after 30ms"), "{}", err);
        assert!(started.elapsed() < Duration::from_secs(2));
    }
}

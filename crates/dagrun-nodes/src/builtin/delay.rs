use std::time::Duration;

use serde_json::{json, Value};

use dagrun_core::node::DelayConfig;

/// Sleep for `ms` and report it.
pub async fn execute(config: &DelayConfig) -> Value {
    if config.ms > 0 {
        tokio::time::sleep(Duration::from_millis(config.ms)).await;
    }
    json!({ "delayed": config.ms })
}

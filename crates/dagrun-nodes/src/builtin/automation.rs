use serde_json::{json, Value};
use tracing::info;

use dagrun_core::node::AutomationConfig;

/// Browser-style automation stub.
///
/// Nothing is ever driven. When the capability is off the node reports
/// `disabled`; when on it acknowledges the request as simulated.
pub fn execute(enabled: bool, config: &AutomationConfig) -> Value {
    if !enabled {
        return json!({ "ok": false, "reason": "disabled" });
    }
    info!(action = %config.action, steps = config.steps.len(), "Automation request recorded");
    json!({
        "ok": true,
        "action": config.action,
        "url": config.url,
        "steps": config.steps.len(),
        "simulated": true,
    })
}

//! Bounded-iteration map.
//!
//! A fixed set of workers pull indices from a shared atomic cursor and write
//! each result into its own write-once slot, so results come out in item
//! order without a merge step. A failing item becomes `{"error": msg}` in its
//! slot; it never fails the node.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use dagrun_core::config::SandboxConfig;
use dagrun_core::error::Result;
use dagrun_core::node::MapConfig;
use dagrun_core::traits::{ScriptRunner, ScriptScope};

/// Items to iterate: configured `items`, else the input when it is a list.
fn items_for(config: &MapConfig, input: &Value) -> Vec<Value> {
    match &config.items {
        Some(items) => items.clone(),
        None => input.as_array().cloned().unwrap_or_default(),
    }
}

pub async fn execute(
    runner: &dyn ScriptRunner,
    sandbox: &SandboxConfig,
    config: &MapConfig,
    input: &Value,
) -> Result<Value> {
    let items = items_for(config, input);
    let workers = config.max_concurrent.max(1).min(items.len().max(1));
    let timeout = Duration::from_millis(sandbox.clamp_timeout(config.timeout_ms));

    debug!(items = items.len(), workers, "Starting map");

    let cursor = AtomicUsize::new(0);
    let slots: Vec<OnceLock<Value>> = items.iter().map(|_| OnceLock::new()).collect();

    {
        let items = &items;
        let cursor = &cursor;
        let slots = &slots;
        let mapper = config.mapper.as_deref();

        let pool = (0..workers).map(move |_| async move {
            loop {
                let index = cursor.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(index) else {
                    break;
                };
                let value = match mapper {
                    None => Ok(item.clone()),
                    Some(script) => {
                        let scope = ScriptScope::new()
                            .with("item", item.clone())
                            .with("index", json!(index))
                            .with("input", input.clone());
                        runner.run(script.to_string(), scope, timeout).await
                    }
                };
                let value = value.unwrap_or_else(|e| {
                    debug!(index, error = %e, "Map item failed");
                    json!({ "error": e.to_string() })
                });
                // Each index is claimed by exactly one worker.
                let _ = slots[index].set(value);
            }
        });

        futures::future::join_all(pool).await;
    }

    let results: Vec<Value> = slots
        .into_iter()
        .map(|slot| slot.into_inner().unwrap_or(Value::Null))
        .collect();

    Ok(json!({ "count": results.len(), "results": results }))
}

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dagrun_core::error::{DagrunError, Result};
use dagrun_core::node::{NodeConfig, NodeOptions};
use dagrun_nodes::{NodeOutput, NodeRegistry};

/// Delay after failed attempt `attempt` (0-based): `base * 2^attempt`.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Final outcome of a node after its retry budget.
#[derive(Debug)]
pub struct Attempted {
    pub result: Result<NodeOutput>,
    pub attempts: u32,
}

/// One attempt: parse the resolved config and execute it, bounded by the
/// node's `timeoutMs` when set.
async fn attempt(
    registry: &NodeRegistry,
    kind: &str,
    config: &Value,
    options: &NodeOptions,
    input: &Value,
) -> Result<NodeOutput> {
    let parsed = NodeConfig::parse(kind, config.clone())?;
    match options.timeout_ms {
        Some(ms) => tokio::time::timeout(
            Duration::from_millis(ms),
            registry.execute(&parsed, input),
        )
        .await
        .map_err(|_| DagrunError::AttemptTimeout(ms))?,
        None => registry.execute(&parsed, input).await,
    }
}

/// Run a node with up to `options.attempts()` tries.
///
/// Every failure is retried the same way, policy violations included.
/// Cancellation during a backoff wait ends the loop with the last error.
pub async fn execute_with_retry(
    registry: &NodeRegistry,
    kind: &str,
    config: &Value,
    options: &NodeOptions,
    input: &Value,
    backoff_base: Duration,
    cancel: &CancellationToken,
) -> Attempted {
    let max_attempts = options.attempts();
    let mut attempts = 0;

    loop {
        let result = attempt(registry, kind, config, options, input).await;
        attempts += 1;

        let err = match result {
            Ok(output) => {
                return Attempted {
                    result: Ok(output),
                    attempts,
                }
            }
            Err(e) => e,
        };

        if attempts >= max_attempts {
            return Attempted {
                result: Err(err),
                attempts,
            };
        }

        let delay = backoff_delay(backoff_base, attempts - 1);
        warn!(
            kind,
            attempt = attempts,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Node attempt failed, retrying"
        );

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                debug!(kind, "Retry abandoned on cancellation");
                return Attempted {
                    result: Err(err),
                    attempts,
                };
            }
        }
    }
}

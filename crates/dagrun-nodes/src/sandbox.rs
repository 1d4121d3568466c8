//! Script sandbox for user-supplied Rhai scripts.
//!
//! `IsolatedRunner` evaluates each script in a fresh interpreter on a blocking
//! thread. The interpreter's progress hook aborts evaluation once the deadline
//! passes, so a runaway script cannot outlive its timeout, and an outer async
//! timeout bounds the wait on the worker thread. Module imports are disabled
//! and `print`/`debug` go to tracing instead of stdout.
//!
//! `DirectRunner` evaluates inline with no deadline. It exists for tests and
//! trusted callers and logs a degraded-mode warning the first time it runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use rhai::{Dynamic, Engine, EvalAltResult, Scope};
use serde_json::Value;
use tracing::{debug, warn};

use dagrun_core::config::SandboxConfig;
use dagrun_core::error::{DagrunError, Result};
use dagrun_core::traits::{ScriptRunner, ScriptScope};

/// Resource caps applied to every interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    pub max_operations: u64,
    pub max_string_size: usize,
    pub max_array_size: usize,
    pub max_map_size: usize,
    pub max_call_levels: usize,
}

impl Default for SandboxLimits {
    fn default() -> Self {
        Self {
            max_operations: 10_000_000,
            max_string_size: 1_000_000,
            max_array_size: 100_000,
            max_map_size: 100_000,
            max_call_levels: 64,
        }
    }
}

impl From<&SandboxConfig> for SandboxLimits {
    fn from(config: &SandboxConfig) -> Self {
        Self {
            max_operations: config.max_operations,
            ..Self::default()
        }
    }
}

/// Build an interpreter with limits applied, imports disabled, and output
/// redirected to tracing.
pub fn new_engine(limits: &SandboxLimits) -> Engine {
    let mut engine = Engine::new();
    engine.set_max_operations(limits.max_operations);
    engine.set_max_string_size(limits.max_string_size);
    engine.set_max_array_size(limits.max_array_size);
    engine.set_max_map_size(limits.max_map_size);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_module_resolver(rhai::module_resolvers::DummyModuleResolver::new());
    engine.on_print(|text| debug!(target: "dagrun::script", "{}", text));
    engine.on_debug(|text, _source, pos| debug!(target: "dagrun::script", %pos, "{}", text));
    engine
}

/// Convert a JSON value into a script value.
pub fn to_dynamic(value: &Value) -> Result<Dynamic> {
    rhai::serde::to_dynamic(value).map_err(|e| DagrunError::Script(e.to_string()))
}

/// Convert a script value back into JSON. Unit becomes `null`.
pub fn from_dynamic(value: &Dynamic) -> Result<Value> {
    if value.is_unit() {
        return Ok(Value::Null);
    }
    rhai::serde::from_dynamic::<Value>(value).map_err(|e| DagrunError::Script(e.to_string()))
}

fn build_scope(scope: &ScriptScope) -> Result<Scope<'static>> {
    let mut rhai_scope = Scope::new();
    for (name, value) in scope.vars() {
        rhai_scope.push_dynamic(name.as_str(), to_dynamic(value)?);
    }
    Ok(rhai_scope)
}

/// Map an interpreter error to a node error, keeping thrown messages intact.
fn script_error(err: Box<EvalAltResult>, timeout_ms: u64) -> DagrunError {
    match *err {
        EvalAltResult::ErrorTerminated(..) => DagrunError::ScriptTimeout(timeout_ms),
        EvalAltResult::ErrorRuntime(ref value, _) => {
            let message = if value.is_string() {
                value.clone().into_string().unwrap_or_default()
            } else if value.is_unit() {
                "script threw".to_string()
            } else {
                value.to_string()
            };
            DagrunError::Script(message)
        }
        EvalAltResult::ErrorTooManyOperations(_) => {
            DagrunError::Script("operation limit exceeded".to_string())
        }
        other => DagrunError::Script(other.to_string()),
    }
}

/// Evaluate on the current thread. `deadline` is enforced through the
/// progress hook when given.
fn eval(
    script: &str,
    scope: &ScriptScope,
    limits: &SandboxLimits,
    deadline: Option<Instant>,
    timeout_ms: u64,
) -> Result<Value> {
    let mut engine = new_engine(limits);
    if let Some(deadline) = deadline {
        engine.on_progress(move |_ops| {
            if Instant::now() >= deadline {
                Some(Dynamic::UNIT)
            } else {
                None
            }
        });
    }
    let mut rhai_scope = build_scope(scope)?;
    let result = engine
        .eval_with_scope::<Dynamic>(&mut rhai_scope, script)
        .map_err(|e| script_error(e, timeout_ms))?;
    from_dynamic(&result)
}

/// Timeout-enforced runner backed by a fresh interpreter per call.
#[derive(Debug, Clone, Default)]
pub struct IsolatedRunner {
    limits: SandboxLimits,
}

impl IsolatedRunner {
    pub fn new(limits: SandboxLimits) -> Self {
        Self { limits }
    }
}

/// Extra wait on top of the script deadline before giving up on the worker.
const JOIN_GRACE: Duration = Duration::from_millis(250);

impl ScriptRunner for IsolatedRunner {
    fn name(&self) -> &str {
        "isolated"
    }

    fn run(
        &self,
        script: String,
        scope: ScriptScope,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Value>> {
        let limits = self.limits;
        Box::pin(async move {
            let timeout_ms = timeout.as_millis() as u64;
            let deadline = Instant::now() + timeout;
            let handle = tokio::task::spawn_blocking(move || {
                eval(&script, &scope, &limits, Some(deadline), timeout_ms)
            });

            match tokio::time::timeout(timeout + JOIN_GRACE, handle).await {
                Ok(Ok(result)) => result,
                Ok(Err(e)) => Err(DagrunError::Script(format!("sandbox worker failed: {}", e))),
                Err(_) => {
                    warn!(timeout_ms, "Script worker did not stop at its deadline");
                    Err(DagrunError::ScriptTimeout(timeout_ms))
                }
            }
        })
    }
}

/// Inline runner without timeout enforcement. Degraded mode.
#[derive(Debug, Default)]
pub struct DirectRunner {
    limits: SandboxLimits,
    warned: AtomicBool,
}

impl DirectRunner {
    pub fn new(limits: SandboxLimits) -> Self {
        Self {
            limits,
            warned: AtomicBool::new(false),
        }
    }
}

impl ScriptRunner for DirectRunner {
    fn name(&self) -> &str {
        "direct"
    }

    fn is_isolated(&self) -> bool {
        false
    }

    fn run(
        &self,
        script: String,
        scope: ScriptScope,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<Value>> {
        if !self.warned.swap(true, Ordering::Relaxed) {
            warn!("Direct script runner in use: script timeouts are not enforced");
        }
        let result = eval(&script, &scope, &self.limits, None, timeout.as_millis() as u64);
        Box::pin(async move { result })
    }
}

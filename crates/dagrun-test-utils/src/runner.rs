use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use dagrun_core::error::{DagrunError, Result};
use dagrun_core::traits::{ScriptRunner, ScriptScope};

type Handler = Arc<dyn Fn(&ScriptScope) -> Result<Value> + Send + Sync>;

/// A `ScriptRunner` that answers from canned handlers instead of evaluating.
///
/// A script registered with [`ScriptedRunner::on`] runs its handler. Any other
/// script that names a scope variable (`"item"`, `"input"`) echoes that
/// variable; everything else fails. Calls and peak concurrency are counted.
#[derive(Clone, Default)]
pub struct ScriptedRunner {
    handlers: Arc<Mutex<HashMap<String, Handler>>>,
    delay: Option<Duration>,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn on<F>(self, script: &str, handler: F) -> Self
    where
        F: Fn(&ScriptScope) -> Result<Value> + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(script.to_string(), Arc::new(handler));
        self
    }

    /// Fail the first `failures` calls of `script`, then return `value`.
    pub fn flaky(self, script: &str, failures: usize, value: Value) -> Self {
        let seen = AtomicUsize::new(0);
        self.on(script, move |_| {
            if seen.fetch_add(1, Ordering::SeqCst) < failures {
                Err(DagrunError::Script("flaky failure".into()))
            } else {
                Ok(value.clone())
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn answer(&self, script: &str, scope: &ScriptScope) -> Result<Value> {
        let handler = self.handlers.lock().unwrap().get(script).cloned();
        if let Some(handler) = handler {
            return handler(scope);
        }
        scope
            .get(script)
            .cloned()
            .ok_or_else(|| DagrunError::Script(format!("no scripted response for '{}'", script)))
    }
}

impl ScriptRunner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    fn run(
        &self,
        script: String,
        scope: ScriptScope,
        _timeout: Duration,
    ) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let result = self.answer(&script, &scope);

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        })
    }
}

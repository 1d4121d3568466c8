use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, BoxStream, StreamExt};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dagrun_core::config::RunConfig;
use dagrun_core::event::{EndEvent, NodeStatus, RunEvent, StepEvent};
use dagrun_core::graph::GraphDocument;
use dagrun_core::node::NodeOptions;
use dagrun_core::secrets::{resolve_secrets, SecretSource};
use dagrun_nodes::NodeRegistry;

use super::edge::EdgeGate;
use super::state::{RunState, Topology};
use crate::retry::execute_with_retry;

/// Per-run budgets.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Soft deadline, checked before each dequeue.
    pub max_runtime: Duration,
    pub backoff_base: Duration,
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from(&RunConfig::default())
    }
}

impl From<&RunConfig> for RunOptions {
    fn from(config: &RunConfig) -> Self {
        Self {
            max_runtime: Duration::from_millis(config.max_runtime_ms),
            backoff_base: Duration::from_millis(config.backoff_base_ms),
            cancel: CancellationToken::new(),
        }
    }
}

/// Runs graphs against a shared node registry.
#[derive(Clone)]
pub struct Scheduler {
    registry: Arc<NodeRegistry>,
}

impl Scheduler {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    /// Start a run and return its event stream.
    ///
    /// The stream is lazy: a node executes only when the next event is
    /// polled, and dropping the stream abandons the run. Secrets are read
    /// through `secrets` immediately before each node, so a rotation takes
    /// effect from the next node on.
    pub fn run(
        &self,
        graph: GraphDocument,
        input: Value,
        secrets: Arc<dyn SecretSource>,
        options: RunOptions,
    ) -> BoxStream<'static, RunEvent> {
        let run = Run::new(self.registry.clone(), graph, input, secrets, options);
        stream::unfold(Some(Box::new(run)), |run| async move {
            let mut run = run?;
            match run.step().await {
                Some(step) => Some((RunEvent::Step(step), Some(run))),
                None => Some((RunEvent::End(run.finish()), None)),
            }
        })
        .boxed()
    }
}

/// One invocation. Owns the run state exclusively.
struct Run {
    id: String,
    registry: Arc<NodeRegistry>,
    topology: Topology,
    state: RunState,
    gate: EdgeGate,
    input: Value,
    secrets: Arc<dyn SecretSource>,
    options: RunOptions,
    unhandled_errors: usize,
    timed_out: bool,
    cancelled: bool,
}

impl Run {
    fn new(
        registry: Arc<NodeRegistry>,
        graph: GraphDocument,
        input: Value,
        secrets: Arc<dyn SecretSource>,
        options: RunOptions,
    ) -> Self {
        let id = uuid::Uuid::new_v4().to_string();
        let topology = Topology::new(graph);
        let state = RunState::new(&topology);
        info!(
            run_id = %id,
            nodes = topology.nodes().len(),
            max_runtime_ms = options.max_runtime.as_millis() as u64,
            "Starting run"
        );
        Self {
            id,
            registry,
            topology,
            state,
            gate: EdgeGate::new(),
            input,
            secrets,
            options,
            unhandled_errors: 0,
            timed_out: false,
            cancelled: false,
        }
    }

    /// Execute the next queued node. `None` once the run is over.
    async fn step(&mut self) -> Option<StepEvent> {
        if !self.state.has_pending() {
            return None;
        }
        if self.options.cancel.is_cancelled() {
            self.cancelled = true;
            return None;
        }
        if self.state.elapsed() >= self.options.max_runtime {
            self.timed_out = true;
            return None;
        }

        let node_id = self.state.dequeue()?;
        let node = self.topology.node(&node_id)?.clone();
        let input = self.state.input_for(&node_id, &self.topology, &self.input);

        let config = resolve_secrets(&node.config, self.secrets.as_ref());
        let options = NodeOptions::from_config(&config);

        debug!(run_id = %self.id, node_id = %node_id, kind = %node.kind, "Running node");
        let started = tokio::time::Instant::now();
        let outcome = execute_with_retry(
            &self.registry,
            &node.kind,
            &config,
            &options,
            &input,
            self.options.backoff_base,
            &self.options.cancel,
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let (status, output, error, cost_usd) = match outcome.result {
            Ok(out) => (NodeStatus::Ok, out.value, None, out.cost_usd),
            Err(e) => {
                let message = e.to_string();
                warn!(
                    run_id = %self.id,
                    node_id = %node_id,
                    attempts = outcome.attempts,
                    error = %message,
                    "Node failed"
                );
                (NodeStatus::Error, json!({ "error": message }), Some(message), 0.0)
            }
        };

        self.state.record(&node_id, output.clone(), cost_usd);

        let mut fired = 0;
        for edge in self.topology.outgoing(&node_id) {
            if self.gate.fires(edge, status, &output) {
                fired += 1;
                if self.state.fire(&node_id, &edge.target) {
                    debug!(run_id = %self.id, node_id = %edge.target, "Node ready");
                }
            }
        }
        if status == NodeStatus::Error && fired == 0 {
            self.unhandled_errors += 1;
        }

        Some(StepEvent {
            node_id,
            name: node.display_name(),
            status,
            input,
            output,
            error,
            duration_ms,
            cost_usd,
            attempts: outcome.attempts,
        })
    }

    fn finish(&self) -> EndEvent {
        let ok = !self.timed_out && !self.cancelled && self.unhandled_errors == 0;
        let end = EndEvent {
            ok,
            run_id: self.id.clone(),
            timed_out: self.timed_out,
            cancelled: self.cancelled,
            duration_ms: self.state.elapsed().as_millis() as u64,
            total_cost_usd: self.state.total_cost(),
        };
        if self.timed_out {
            warn!(run_id = %self.id, "Run deadline reached, remaining nodes skipped");
        }
        info!(
            run_id = %self.id,
            ok,
            unhandled_errors = self.unhandled_errors,
            duration_ms = end.duration_ms,
            "Run finished"
        );
        end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dagrun_core::graph::Edge;
    use dagrun_core::secrets::{SecretMap, SharedSecrets};
    use dagrun_core::EngineConfig;
    use dagrun_test_utils::{GraphBuilder, ScriptedRunner};

    fn scheduler(runner: Option<ScriptedRunner>) -> Scheduler {
        let mut builder = NodeRegistry::builder(&EngineConfig::default());
        if let Some(runner) = runner {
            builder = builder.script_runner(Arc::new(runner));
        }
        Scheduler::new(Arc::new(builder.build().unwrap()))
    }

    fn no_secrets() -> Arc<dyn SecretSource> {
        Arc::new(SecretMap::new())
    }

    async fn collect(
        scheduler: &Scheduler,
        graph: GraphDocument,
        input: Value,
        options: RunOptions,
    ) -> (Vec<StepEvent>, EndEvent) {
        let events: Vec<RunEvent> = scheduler
            .run(graph, input, no_secrets(), options)
            .collect()
            .await;
        let (last, steps) = events.split_last().expect("end event");
        let steps = steps.iter().map(|e| e.as_step().unwrap().clone()).collect();
        (steps, last.as_end().expect("end event last").clone())
    }

    fn ids(steps: &[StepEvent]) -> Vec<&str> {
        steps.iter().map(|s| s.node_id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_boom_caught_scenario() {
        let graph = GraphBuilder::new()
            .trigger("in")
            .script("boom", r#"throw "boom went the node";"#)
            .script("ok", "1")
            .script("caught", r#""handled""#)
            .link("in", "boom")
            .edge(Edge::on_success("boom", "ok"))
            .edge(Edge::on_error("boom", "caught"))
            .build();

        let (steps, end) = collect(&scheduler(None), graph, json!({}), RunOptions::default()).await;

        assert_eq!(ids(&steps), vec!["in", "boom", "caught"]);
        assert_eq!(steps[0].status, NodeStatus::Ok);
        assert_eq!(steps[1].status, NodeStatus::Error);
        assert!(steps[1].error.as_deref().unwrap().contains("boom went the node"));
        assert_eq!(steps[2].status, NodeStatus::Ok);
        assert_eq!(steps[2].output, json!("handled"));
        assert!(end.ok, "the failure was handled by a catch edge");
    }

    #[tokio::test]
    async fn test_unhandled_error_marks_run_not_ok() {
        let graph = GraphBuilder::new()
            .trigger("in")
            .script("boom", r#"throw "bad";"#)
            .link("in", "boom")
            .build();
        let (steps, end) = collect(&scheduler(None), graph, Value::Null, RunOptions::default()).await;
        assert_eq!(steps.len(), 2);
        assert!(steps[1].error.as_deref().unwrap().contains("bad"));
        assert!(!end.ok);
        assert!(!end.timed_out);
    }

    #[tokio::test]
    async fn test_all_join_runs_in_topological_order() {
        let graph = GraphBuilder::new()
            .trigger("in")
            .script("a", "input.n + 1")
            .script("b", "input.n + 2")
            .script("c", "input.a + input.b")
            .script("d", "input * 10")
            .link("in", "a")
            .link("in", "b")
            .link("a", "c")
            .link("b", "c")
            .link("c", "d")
            .build();

        let (steps, end) = collect(&scheduler(None), graph, json!({ "n": 1 }), RunOptions::default()).await;
        assert_eq!(ids(&steps), vec!["in", "a", "b", "c", "d"]);
        assert_eq!(steps[3].input, json!({ "a": 2, "b": 3 }));
        assert_eq!(steps[4].output, json!(50));
        assert!(end.ok);
    }

    #[tokio::test]
    async fn test_any_join_does_not_wait_for_dead_branch() {
        let graph = GraphBuilder::new()
            .trigger("in")
            .script("fast", "\"fast\"")
            .script("broken", r#"throw "x";"#)
            .script("never", "1")
            .node("merge", "script", json!({ "script": "input", "join": "any" }))
            .link("in", "fast")
            .link("in", "broken")
            .edge(Edge::on_success("broken", "never"))
            .link("fast", "merge")
            .edge(Edge::on_success("never", "merge"))
            .build();

        let (steps, _) = collect(&scheduler(None), graph, Value::Null, RunOptions::default()).await;
        assert_eq!(ids(&steps), vec!["in", "fast", "broken", "merge"]);
        assert_eq!(steps[3].output, json!("fast"));
    }

    #[tokio::test]
    async fn test_count_join() {
        let graph = GraphBuilder::new()
            .trigger("in")
            .script("a", "1")
            .script("b", "2")
            .script("c", "3")
            .node("two", "script", json!({ "script": "input", "join": "count:2" }))
            .link("in", "a")
            .link("in", "b")
            .link("a", "two")
            .link("b", "two")
            .link("b", "c")
            .link("c", "two")
            .build();

        let (steps, _) = collect(&scheduler(None), graph, Value::Null, RunOptions::default()).await;
        assert_eq!(ids(&steps), vec!["in", "a", "b", "two", "c"]);
        assert_eq!(steps[3].output, json!({ "a": 1, "b": 2 }));
    }

    #[tokio::test]
    async fn test_policy_violations_fail_every_attempt() {
        let graph = GraphBuilder::new()
            .node("trace", "http", json!({ "url": "https://api.github.com/", "method": "TRACE", "retries": 2 }))
            .node("evil", "http", json!({ "url": "https://evil.example/x" }))
            .node(
                "big",
                "http",
                json!({ "url": "https://api.github.com/", "method": "POST", "body": "x".repeat(1_000_001) }),
            )
            .build();

        let options = RunOptions {
            backoff_base: Duration::from_millis(1),
            ..RunOptions::default()
        };
        let (steps, end) = collect(&scheduler(None), graph, Value::Null, options).await;

        assert!(steps.iter().all(|s| !s.is_ok()));
        assert!(steps[0].error.as_deref().unwrap().contains("method not allowed"));
        assert_eq!(steps[0].attempts, 3);
        assert!(steps[1].error.as_deref().unwrap().contains("host not allowed"));
        assert!(steps[2].error.as_deref().unwrap().contains("body too large"));
        assert!(!end.ok);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_make_n_plus_one_attempts() {
        let runner = ScriptedRunner::new().flaky("flaky", usize::MAX, Value::Null);
        let graph = GraphBuilder::new()
            .node("f", "script", json!({ "script": "flaky", "retries": 2 }))
            .build();

        let (steps, _) = collect(&scheduler(Some(runner.clone())), graph, Value::Null, RunOptions::default()).await;
        assert_eq!(steps[0].attempts, 3);
        assert_eq!(runner.calls(), 3);
        // 200ms + 400ms of backoff
        assert!((600..650).contains(&steps[0].duration_ms), "{}", steps[0].duration_ms);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_truncates_queue() {
        let graph = GraphBuilder::new()
            .node("slow", "delay", json!({ "ms": 500 }))
            .node("next", "delay", json!({}))
            .link("slow", "next")
            .build();
        let options = RunOptions {
            max_runtime: Duration::from_millis(100),
            ..RunOptions::default()
        };

        let (steps, end) = collect(&scheduler(None), graph, Value::Null, options).await;
        assert_eq!(ids(&steps), vec!["slow"], "in-flight node is not pre-empted");
        assert!(end.timed_out);
        assert!(!end.ok);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let graph = GraphBuilder::new().trigger("in").build();
        let options = RunOptions::default();
        options.cancel.cancel();
        let (steps, end) = collect(&scheduler(None), graph, Value::Null, options).await;
        assert!(steps.is_empty());
        assert!(end.cancelled);
        assert!(!end.ok);
    }

    #[tokio::test]
    async fn test_secrets_resolved_per_node() {
        let secrets = Arc::new(SharedSecrets::new(SecretMap::from([(
            "TOKEN".to_string(),
            "first".to_string(),
        )])));
        let graph = GraphBuilder::new()
            .script("a", r#""${TOKEN}""#)
            .script("b", r#""${TOKEN}|${MISSING}""#)
            .link("a", "b")
            .build();

        let sched = scheduler(None);
        let mut stream = sched.run(graph, Value::Null, secrets.clone(), RunOptions::default());

        let first = stream.next().await.unwrap();
        assert_eq!(first.as_step().unwrap().output, json!("first"));

        secrets.set("TOKEN", "rotated");
        let second = stream.next().await.unwrap();
        assert_eq!(second.as_step().unwrap().output, json!("rotated|"));
        assert!(stream.next().await.unwrap().as_end().unwrap().ok);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_guarded_branches_and_names() {
        let graph = GraphBuilder::new()
            .node("check", "decision", json!({ "branches": ["big", "small"], "name": "Size check" }))
            .script("big", r#""big""#)
            .script("small", r#""small""#)
            .edge(Edge::guarded("check", "big", "output.amount > 100").with_label("big"))
            .edge(Edge::guarded("check", "small", "output.amount <= 100").with_label("small"))
            .build();

        let (steps, _) = collect(&scheduler(None), graph, json!({ "amount": 250 }), RunOptions::default()).await;
        assert_eq!(ids(&steps), vec!["check", "big"]);
        assert_eq!(steps[0].name.as_deref(), Some("Size check"));
        assert_eq!(steps[1].input, json!({ "amount": 250 }));
    }

    #[tokio::test]
    async fn test_unknown_type_succeeds() {
        let graph = GraphBuilder::new().node("n", "sticky_note", json!({})).build();
        let (steps, end) = collect(&scheduler(None), graph, Value::Null, RunOptions::default()).await;
        assert_eq!(steps[0].output, json!({ "ok": true }));
        assert!(end.ok);
    }

    #[tokio::test]
    async fn test_map_node_collapses_to_one_event() {
        let graph = GraphBuilder::new()
            .trigger("in")
            .node(
                "m",
                "map",
                json!({ "mapper": r#"if item == 2 { throw "two"; } item * 2"#, "maxConcurrent": 2 }),
            )
            .link("in", "m")
            .build();
        let (steps, _) = collect(&scheduler(None), graph, json!([1, 2, 3]), RunOptions::default()).await;
        assert_eq!(steps.len(), 2);
        let out = &steps[1].output;
        assert_eq!(out["count"], 3);
        assert_eq!(out["results"][0], json!(2));
        assert!(out["results"][1]["error"].as_str().unwrap().contains("two"));
        assert_eq!(out["results"][2], json!(6));
    }
}

use rhai::{Dynamic, Engine, Scope};
use serde_json::Value;
use tracing::debug;

use dagrun_core::error::{DagrunError, Result};
use dagrun_core::event::NodeStatus;
use dagrun_core::graph::{Edge, EdgeKind};
use dagrun_nodes::sandbox::{new_engine, to_dynamic, SandboxLimits};

/// Operation cap for a single guard expression.
const GUARD_MAX_OPERATIONS: u64 = 100_000;

/// Decides whether an outgoing edge fires for a finished node.
pub struct EdgeGate {
    engine: Engine,
}

impl Default for EdgeGate {
    fn default() -> Self {
        Self::new()
    }
}

impl EdgeGate {
    pub fn new() -> Self {
        let limits = SandboxLimits {
            max_operations: GUARD_MAX_OPERATIONS,
            ..SandboxLimits::default()
        };
        Self {
            engine: new_engine(&limits),
        }
    }

    /// Rules, in order: a typed edge requires the matching status, then a
    /// guard (if any) must evaluate truthy. Guard errors count as false.
    pub fn fires(&self, edge: &Edge, status: NodeStatus, output: &Value) -> bool {
        match (edge.kind(), status) {
            (Some(EdgeKind::Error), NodeStatus::Ok) => return false,
            (Some(EdgeKind::Success), NodeStatus::Error) => return false,
            _ => {}
        }

        let Some(guard) = edge.guard() else {
            return true;
        };

        match self.evaluate(guard, status, output) {
            Ok(result) => result,
            Err(e) => {
                debug!(
                    source = %edge.source,
                    target = %edge.target,
                    error = %e,
                    "Guard failed, edge does not fire"
                );
                false
            }
        }
    }

    /// Evaluate a guard with `output` and `status` in scope.
    pub fn evaluate(&self, guard: &str, status: NodeStatus, output: &Value) -> Result<bool> {
        let mut scope = Scope::new();
        scope.push_dynamic("output", to_dynamic(output)?);
        scope.push("status", status.as_str().to_string());

        let value = self
            .engine
            .eval_with_scope::<Dynamic>(&mut scope, guard)
            .map_err(|e| DagrunError::Script(format!("guard '{}': {}", guard, e)))?;
        Ok(truthy(&value))
    }
}

/// `false`, `()`, `0`, `0.0` and `""` are falsy; everything else is truthy.
pub fn truthy(value: &Dynamic) -> bool {
    if let Ok(b) = value.as_bool() {
        return b;
    }
    if value.is_unit() {
        return false;
    }
    if let Ok(i) = value.as_int() {
        return i != 0;
    }
    if let Ok(f) = value.as_float() {
        return f != 0.0;
    }
    if let Ok(s) = value.clone().into_immutable_string() {
        return !s.is_empty();
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_typed_edges() {
        let gate = EdgeGate::new();
        let on_error = Edge::on_error("a", "b");
        let on_success = Edge::on_success("a", "b");
        let plain = Edge::always("a", "b");

        assert!(gate.fires(&on_error, NodeStatus::Error, &Value::Null));
        assert!(!gate.fires(&on_error, NodeStatus::Ok, &Value::Null));
        assert!(gate.fires(&on_success, NodeStatus::Ok, &Value::Null));
        assert!(!gate.fires(&on_success, NodeStatus::Error, &Value::Null));
        assert!(gate.fires(&plain, NodeStatus::Ok, &Value::Null));
        assert!(gate.fires(&plain, NodeStatus::Error, &Value::Null));
    }

    #[test]
    fn test_guard_over_output() {
        let gate = EdgeGate::new();
        let edge = Edge::guarded("a", "b", "output.score > 0.5 && output.tags.len() > 0");
        let hit = json!({ "score": 0.9, "tags": ["vip"] });
        let low = json!({ "score": 0.1, "tags": ["vip"] });
        let miss = json!({ "score": 0.9, "tags": [] });
        assert!(gate.fires(&edge, NodeStatus::Ok, &hit));
        assert!(!gate.fires(&edge, NodeStatus::Ok, &miss));
        assert!(!gate.fires(&edge, NodeStatus::Ok, &low));
    }

    #[test]
    fn test_guard_sees_status() {
        let gate = EdgeGate::new();
        let edge = Edge::guarded("a", "b", r#"status == "error""#);
        assert!(gate.fires(&edge, NodeStatus::Error, &Value::Null));
        assert!(!gate.fires(&edge, NodeStatus::Ok, &Value::Null));
    }

    #[test]
    fn test_type_checked_before_guard() {
        let gate = EdgeGate::new();
        let edge = Edge::guarded("a", "b", "true").with_kind(EdgeKind::Success);
        assert!(!gate.fires(&edge, NodeStatus::Error, &Value::Null));
    }

    #[test]
    fn test_throwing_guard_does_not_fire() {
        let gate = EdgeGate::new();
        for guard in [r#"throw "nope""#, "output.missing.deeper > 1", "this is not rhai", "loop {}"] {
            let edge = Edge::guarded("a", "b", guard);
            assert!(!gate.fires(&edge, NodeStatus::Ok, &json!({})), "{}", guard);
        }
    }

    #[test]
    fn test_truthiness() {
        let gate = EdgeGate::new();
        let cases = [
            ("0", false),
            ("0.0", false),
            (r#""""#, false),
            ("()", false),
            ("false", false),
            ("1", true),
            (r#""x""#, true),
            ("[]", true),
            ("output", true),
        ];
        for (guard, expected) in cases {
            assert_eq!(
                gate.evaluate(guard, NodeStatus::Ok, &json!({ "k": 1 })).unwrap(),
                expected,
                "{}",
                guard
            );
        }
        assert!(!gate.evaluate("output", NodeStatus::Ok, &Value::Null).unwrap());
    }
}

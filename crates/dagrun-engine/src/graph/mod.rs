//! Graph execution: a readiness scheduler over a DAG of typed nodes.
//!
//! Nodes run one at a time in FIFO order. When a node finishes, each of its
//! outgoing edges is put through the `EdgeGate`; a fired edge bumps the
//! target's ready count, and the target is queued once the count reaches
//! what its join policy requires. Every executed node yields one
//! `StepEvent`; the stream ends with a single `EndEvent`.

pub mod edge;
pub mod executor;
pub mod state;
pub mod validate;

pub use edge::EdgeGate;
pub use executor::{RunOptions, Scheduler};
pub use state::{RunState, Topology};
pub use validate::{ensure_valid, validate, GraphIssue};

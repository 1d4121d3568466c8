pub mod emitter;
pub mod graph;
pub mod retry;

pub use emitter::{spawn_run, write_ndjson};
pub use graph::{ensure_valid, validate, EdgeGate, GraphIssue, RunOptions, Scheduler};
pub use retry::backoff_delay;

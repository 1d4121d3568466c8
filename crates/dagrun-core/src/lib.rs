pub mod config;
pub mod error;
pub mod event;
pub mod graph;
pub mod node;
pub mod secrets;
pub mod security;
pub mod traits;

pub use config::EngineConfig;
pub use error::{DagrunError, Result};
pub use event::{EndEvent, NodeStatus, RunEvent, StepEvent};
pub use graph::{Edge, EdgeData, EdgeKind, GraphDocument, Node};
pub use node::{JoinPolicy, NodeConfig, NodeOptions};
pub use secrets::{resolve_secrets, SecretMap, SecretSource, SharedSecrets};
pub use security::EgressPolicy;
pub use traits::{Connector, OutboundMessage, ScriptRunner, ScriptScope};

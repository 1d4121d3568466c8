pub mod builtin;
pub mod connectors;
pub mod registry;
pub mod sandbox;

pub use registry::{NodeOutput, NodeRegistry, NodeRegistryBuilder};
pub use sandbox::{DirectRunner, IsolatedRunner, SandboxLimits};

//! Mocks and fixtures shared by the dagrun test suites.

mod connector;
mod fixtures;
mod runner;

pub use connector::RecordingConnector;
pub use fixtures::{write_temp_file, GraphBuilder};
pub use runner::ScriptedRunner;

//! Outbound messaging connectors.
//!
//! Connectors are looked up by name when a messaging node runs. Slack and
//! email are only registered when configured; the chat webhook connector is
//! always present since the endpoint comes from the node itself.

pub mod email;
pub mod slack;
pub mod webhook;

pub use email::EmailConnector;
pub use slack::SlackConnector;
pub use webhook::WebhookConnector;

use dagrun_core::error::DagrunError;

pub(crate) fn connector_error(connector: &str, message: impl Into<String>) -> DagrunError {
    DagrunError::Connector {
        connector: connector.to_string(),
        message: message.into(),
    }
}

use serde_json::Value;
use tracing::debug;

use dagrun_core::error::{DagrunError, Result};
use dagrun_core::node::{ChatMessage, EmailMessage, SlackMessage};
use dagrun_core::traits::{Connector, OutboundMessage};

/// Message text: configured text, else the node input as text.
fn text_or_input(text: &Option<String>, input: &Value) -> String {
    match (text, input) {
        (Some(text), _) => text.clone(),
        (None, Value::String(s)) => s.clone(),
        (None, Value::Null) => String::new(),
        (None, other) => other.to_string(),
    }
}

pub fn slack_message(config: &SlackMessage, input: &Value) -> OutboundMessage {
    OutboundMessage {
        to: vec![config.channel.clone()],
        text: text_or_input(&config.text, input),
        ..OutboundMessage::default()
    }
}

pub fn chat_message(config: &ChatMessage, input: &Value) -> OutboundMessage {
    OutboundMessage {
        text: text_or_input(&config.text, input),
        url: Some(config.url.clone()),
        username: config.username.clone(),
        ..OutboundMessage::default()
    }
}

pub fn email_message(config: &EmailMessage, input: &Value) -> OutboundMessage {
    OutboundMessage {
        to: config.to.clone(),
        subject: Some(config.subject.clone()),
        text: text_or_input(&config.body, input),
        html: config.html,
        ..OutboundMessage::default()
    }
}

/// Deliver through the named connector.
pub async fn deliver(
    connector: Option<&dyn Connector>,
    name: &str,
    message: OutboundMessage,
) -> Result<Value> {
    let connector =
        connector.ok_or_else(|| DagrunError::ConnectorNotConfigured(name.to_string()))?;
    debug!(connector = connector.name(), "Delivering message");
    connector.send(message).await
}

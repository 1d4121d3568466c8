use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use dagrun_core::config::SlackConnectorConfig;
use dagrun_core::error::Result;
use dagrun_core::traits::{Connector, OutboundMessage};

use super::connector_error;
use crate::builtin::http::redirect_violation;

/// Slack Web API connector (`chat.postMessage` with a bot token).
pub struct SlackConnector {
    config: SlackConnectorConfig,
    http: reqwest::Client,
}

impl SlackConnector {
    pub fn new(config: SlackConnectorConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    async fn post_message(&self, channel: &str, text: &str) -> Result<Value> {
        let url = format!("{}/chat.postMessage", self.config.api_base.trim_end_matches('/'));
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.config.bot_token)
            .json(&json!({
                "channel": channel,
                "text": text,
            }))
            .send()
            .await
            .map_err(|e| {
                redirect_violation(&e)
                    .unwrap_or_else(|| connector_error("slack", format!("chat.postMessage failed: {e}")))
            })?;

        let body: Value = resp
            .json()
            .await
            .map_err(|e| connector_error("slack", format!("Invalid postMessage response: {e}")))?;

        if !body["ok"].as_bool().unwrap_or(false) {
            return Err(connector_error(
                "slack",
                format!(
                    "chat.postMessage error: {}",
                    body["error"].as_str().unwrap_or("unknown")
                ),
            ));
        }

        Ok(json!({
            "ok": true,
            "channel": body["channel"].as_str().unwrap_or(channel),
            "ts": body["ts"].clone(),
        }))
    }
}

impl Connector for SlackConnector {
    fn name(&self) -> &str {
        "slack"
    }

    fn send(&self, message: OutboundMessage) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let channel = message
                .to
                .first()
                .ok_or_else(|| connector_error("slack", "missing channel"))?;
            debug!(channel = %channel, "Posting Slack message");
            self.post_message(channel, &message.text).await
        })
    }
}

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use dagrun_core::error::Result;
use dagrun_core::security::EgressPolicy;
use dagrun_core::traits::{Connector, OutboundMessage};

use super::connector_error;
use crate::builtin::http::{guard_url, redirect_violation};

/// Incoming-webhook chat connector.
///
/// Posts `{text, content, username}` so the same payload is accepted by
/// Slack-, Discord- and Teams-style webhooks. The webhook URL comes from the
/// node config and is subject to the egress policy.
pub struct WebhookConnector {
    policy: EgressPolicy,
    http: reqwest::Client,
}

impl WebhookConnector {
    pub fn new(policy: EgressPolicy, http: reqwest::Client) -> Self {
        Self { policy, http }
    }
}

impl Connector for WebhookConnector {
    fn name(&self) -> &str {
        "chat"
    }

    fn send(&self, message: OutboundMessage) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let raw = message
                .url
                .as_deref()
                .ok_or_else(|| connector_error("chat", "missing webhook url"))?;
            let url = guard_url(&self.policy, raw)?;

            let mut payload = json!({
                "text": message.text,
                "content": message.text,
            });
            if let Some(username) = &message.username {
                payload["username"] = json!(username);
            }
            let body = serde_json::to_vec(&payload)?;
            self.policy.check_body(body.len())?;

            debug!(host = url.host_str().unwrap_or_default(), "Posting chat webhook");

            let resp = self
                .http
                .post(url)
                .header("content-type", "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| {
                    redirect_violation(&e)
                        .unwrap_or_else(|| connector_error("chat", format!("webhook post failed: {e}")))
                })?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(connector_error(
                    "chat",
                    format!("webhook returned {}: {}", status.as_u16(), text),
                ));
            }
            Ok(json!({ "ok": true, "status": status.as_u16() }))
        })
    }
}

use futures::future::BoxFuture;
use serde_json::{json, Value};
use tracing::debug;

use dagrun_core::config::EmailConnectorConfig;
use dagrun_core::error::Result;
use dagrun_core::traits::{Connector, OutboundMessage};

use super::connector_error;
use crate::builtin::http::redirect_violation;

/// Email over an HTTP send API (Resend-style JSON body, bearer key).
pub struct EmailConnector {
    config: EmailConnectorConfig,
    http: reqwest::Client,
}

impl EmailConnector {
    pub fn new(config: EmailConnectorConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn payload(&self, message: &OutboundMessage) -> Value {
        let mut payload = json!({
            "from": self.config.from,
            "to": message.to,
            "subject": message.subject.clone().unwrap_or_default(),
        });
        let field = if message.html { "html" } else { "text" };
        payload[field] = json!(message.text);
        payload
    }
}

impl Connector for EmailConnector {
    fn name(&self) -> &str {
        "email"
    }

    fn send(&self, message: OutboundMessage) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            if message.to.is_empty() {
                return Err(connector_error("email", "no recipients"));
            }
            debug!(recipients = message.to.len(), "Sending email");

            let resp = self
                .http
                .post(&self.config.api_url)
                .bearer_auth(&self.config.api_key)
                .json(&self.payload(&message))
                .send()
                .await
                .map_err(|e| {
                    redirect_violation(&e)
                        .unwrap_or_else(|| connector_error("email", format!("send failed: {e}")))
                })?;

            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(connector_error(
                    "email",
                    format!("provider returned {}: {}", status.as_u16(), text),
                ));
            }

            let receipt: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
            Ok(json!({
                "ok": true,
                "id": receipt.get("id").cloned().unwrap_or(Value::Null),
                "to": message.to,
            }))
        })
    }
}

use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use serde_json::{json, Value};

use dagrun_core::error::Result;
use dagrun_core::traits::{Connector, OutboundMessage};

/// Connector that keeps every message it is handed. Clones share the log.
#[derive(Clone)]
pub struct RecordingConnector {
    name: String,
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
}

impl RecordingConnector {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }
}

impl Connector for RecordingConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: OutboundMessage) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let mut sent = self.sent.lock().unwrap();
            sent.push(message);
            Ok(json!({ "ok": true, "seq": sent.len() }))
        })
    }
}

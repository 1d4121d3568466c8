use std::time::Duration;

use reqwest::redirect::{Attempt, Policy};
use reqwest::Url;
use serde_json::{json, Value};
use tracing::{debug, warn};

use dagrun_core::error::{DagrunError, Result};
use dagrun_core::node::HttpConfig;
use dagrun_core::security::EgressPolicy;

/// Parse a URL and check its scheme and host against the egress policy.
pub fn guard_url(policy: &EgressPolicy, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| DagrunError::InvalidUrl(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(DagrunError::InvalidUrl(format!(
                "unsupported scheme '{}' in {}",
                other, raw
            )))
        }
    }
    let host = url
        .host_str()
        .ok_or_else(|| DagrunError::InvalidUrl(format!("missing host in {}", raw)))?;
    policy.check_host(host)?;
    Ok(url)
}

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 10;

/// Redirect policy that re-checks every hop's host against the egress policy.
pub fn redirect_policy(policy: EgressPolicy) -> Policy {
    Policy::custom(move |attempt: Attempt<'_>| {
        if attempt.previous().len() > MAX_REDIRECTS {
            return attempt.error(format!("too many redirects (max {})", MAX_REDIRECTS));
        }
        let verdict = match attempt.url().host_str() {
            Some(host) => policy.check_host(host),
            None => Err(DagrunError::InvalidUrl(format!(
                "missing host in redirect to {}",
                attempt.url()
            ))),
        };
        match verdict {
            Ok(()) => attempt.follow(),
            Err(e) => {
                warn!(url = %attempt.url(), "Blocked redirect outside egress allow-list");
                attempt.error(e)
            }
        }
    })
}

/// HTTP client shared by network-call nodes and connectors.
pub fn egress_client(policy: &EgressPolicy, timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(redirect_policy(policy.clone()))
        .build()
        .map_err(|e| DagrunError::Http(format!("failed to build HTTP client: {e}")))
}

/// The egress violation behind a blocked redirect, if that is what failed.
pub fn redirect_violation(err: &reqwest::Error) -> Option<DagrunError> {
    let mut source = std::error::Error::source(err);
    while let Some(inner) = source {
        match inner.downcast_ref::<DagrunError>() {
            Some(DagrunError::HostNotAllowed(host)) => {
                return Some(DagrunError::HostNotAllowed(host.clone()))
            }
            Some(DagrunError::InvalidUrl(url)) => return Some(DagrunError::InvalidUrl(url.clone())),
            _ => {}
        }
        source = inner.source();
    }
    None
}

/// Encode the configured body. Strings go out verbatim, other values as JSON.
fn encode_body(body: &Option<Value>) -> Result<Option<(Vec<u8>, bool)>> {
    match body {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some((s.clone().into_bytes(), false))),
        Some(other) => Ok(Some((serde_json::to_vec(other)?, true))),
    }
}

/// Response body as JSON when it parses, else `{status, body}`.
pub fn parse_response(status: u16, text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| json!({ "status": status, "body": text }))
}

/// Execute a network-call node.
///
/// Policy checks run before any I/O: method allow-list, then host
/// allow-list, then body size.
pub async fn execute(
    client: &reqwest::Client,
    policy: &EgressPolicy,
    config: &HttpConfig,
) -> Result<Value> {
    let method = policy.check_method(&config.method)?;
    let url = guard_url(policy, &config.url)?;

    let body = encode_body(&config.body)?;
    if let Some((bytes, _)) = &body {
        policy.check_body(bytes.len())?;
    }

    let method = reqwest::Method::from_bytes(method.as_bytes())
        .map_err(|_| DagrunError::MethodNotAllowed(config.method.clone()))?;

    debug!(method = %method, url = %url, "Sending HTTP request");

    let mut req = client.request(method, url);
    let mut has_content_type = false;
    for (k, v) in &config.headers {
        has_content_type |= k.eq_ignore_ascii_case("content-type");
        req = req.header(k.as_str(), v.as_str());
    }
    if let Some((bytes, is_json)) = body {
        if is_json && !has_content_type {
            req = req.header("content-type", "application/json");
        }
        req = req.body(bytes);
    }

    let resp = req.send().await.map_err(|e| {
        redirect_violation(&e).unwrap_or_else(|| DagrunError::Http(e.to_string()))
    })?;
    let status = resp.status().as_u16();
    let text = resp
        .text()
        .await
        .map_err(|e| DagrunError::Http(format!("failed to read response body: {}", e)))?;

    Ok(parse_response(status, &text))
}

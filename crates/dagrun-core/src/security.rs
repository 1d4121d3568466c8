use serde::{Deserialize, Serialize};

use crate::error::{DagrunError, Result};

/// HTTP verbs a network-call node may use.
pub const ALLOWED_METHODS: [&str; 6] = ["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// Default request body cap in bytes.
pub const DEFAULT_MAX_BODY_BYTES: usize = 1_000_000;

/// Outbound network guardrails for network-call and webhook nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EgressPolicy {
    /// Hostnames allowed by suffix (`github.com` also admits `api.github.com`).
    #[serde(default = "EgressPolicy::default_hosts")]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    DEFAULT_MAX_BODY_BYTES
}

impl Default for EgressPolicy {
    fn default() -> Self {
        Self {
            allowed_hosts: Self::default_hosts(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl EgressPolicy {
    /// Built-in allow-list.
    pub fn default_hosts() -> Vec<String> {
        vec![
            "api.github.com".to_string(),
            "httpbin.org".to_string(),
            "jsonplaceholder.typicode.com".to_string(),
            "hooks.slack.com".to_string(),
        ]
    }

    /// Normalize and check an HTTP method against the fixed allow-list.
    pub fn check_method(&self, method: &str) -> Result<String> {
        let upper = method.trim().to_uppercase();
        if ALLOWED_METHODS.contains(&upper.as_str()) {
            Ok(upper)
        } else {
            Err(DagrunError::MethodNotAllowed(method.to_string()))
        }
    }

    /// Check a hostname against the allow-list by domain suffix.
    pub fn check_host(&self, host: &str) -> Result<()> {
        let host = host.trim_end_matches('.').to_lowercase();
        let allowed = self.allowed_hosts.iter().any(|entry| {
            let entry = entry.trim().trim_start_matches('.').to_lowercase();
            !entry.is_empty() && (host == entry || host.ends_with(&format!(".{}", entry)))
        });
        if allowed {
            Ok(())
        } else {
            Err(DagrunError::HostNotAllowed(host))
        }
    }

    pub fn check_body(&self, size: usize) -> Result<()> {
        if size > self.max_body_bytes {
            Err(DagrunError::BodyTooLarge {
                size,
                limit: self.max_body_bytes,
            })
        } else {
            Ok(())
        }
    }

    /// Append extra allowed hosts, skipping duplicates.
    pub fn allow_hosts<I, S>(&mut self, hosts: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for host in hosts {
            let host = host.into();
            if !self.allowed_hosts.contains(&host) {
                self.allowed_hosts.push(host);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_allowlist() {
        let policy = EgressPolicy::default();
        assert_eq!(policy.check_method("get").unwrap(), "GET");
        assert_eq!(policy.check_method("PATCH").unwrap(), "PATCH");
        let err = policy.check_method("TRACE").unwrap_err();
        assert!(err.to_string().contains("method not allowed"));
        assert!(policy.check_method("CONNECT").is_err());
    }

    #[test]
    fn test_host_suffix_match() {
        let policy = EgressPolicy {
            allowed_hosts: vec!["example.com".into()],
            max_body_bytes: 10,
        };
        assert!(policy.check_host("example.com").is_ok());
        assert!(policy.check_host("api.example.com").is_ok());
        assert!(policy.check_host("API.Example.COM.").is_ok());
        let err = policy.check_host("badexample.com").unwrap_err();
        assert!(err.to_string().contains("host not allowed"));
        assert!(policy.check_host("example.com.evil.test").is_err());
    }

    #[test]
    fn test_empty_entries_never_match() {
        let policy = EgressPolicy {
            allowed_hosts: vec!["".into(), ".".into()],
            max_body_bytes: 10,
        };
        assert!(policy.check_host("anything.test").is_err());
    }

    #[test]
    fn test_body_cap() {
        let policy = EgressPolicy {
            allowed_hosts: vec![],
            max_body_bytes: 10,
        };
        assert!(policy.check_body(10).is_ok());
        let err = policy.check_body(11).unwrap_err();
        assert!(err.to_string().contains("body too large"));
    }

    #[test]
    fn test_allow_hosts_dedupes() {
        let mut policy = EgressPolicy::default();
        let before = policy.allowed_hosts.len();
        policy.allow_hosts(["httpbin.org", "127.0.0.1"]);
        assert_eq!(policy.allowed_hosts.len(), before + 1);
    }
}

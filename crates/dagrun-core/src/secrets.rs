use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use regex::{Captures, Regex};
use serde_json::Value;

/// Plain name → value secret map.
pub type SecretMap = HashMap<String, String>;

/// Source of secret values. Looked up once per node, right before it runs.
pub trait SecretSource: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

impl SecretSource for SecretMap {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

/// A secret map the caller can rotate while a run is in progress.
/// Later nodes in the same run see the new values.
#[derive(Debug, Default)]
pub struct SharedSecrets {
    inner: RwLock<SecretMap>,
}

impl SharedSecrets {
    pub fn new(map: SecretMap) -> Self {
        Self {
            inner: RwLock::new(map),
        }
    }

    /// Replace the whole map.
    pub fn rotate(&self, map: SecretMap) {
        match self.inner.write() {
            Ok(mut guard) => *guard = map,
            Err(poisoned) => *poisoned.into_inner() = map,
        }
    }

    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        match self.inner.write() {
            Ok(mut guard) => {
                guard.insert(name.into(), value.into());
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(name.into(), value.into());
            }
        }
    }
}

impl SecretSource for SharedSecrets {
    fn get(&self, name: &str) -> Option<String> {
        match self.inner.read() {
            Ok(guard) => guard.get(name).cloned(),
            Err(poisoned) => poisoned.into_inner().get(name).cloned(),
        }
    }
}

fn placeholder() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid placeholder regex"))
}

/// Deep-substitute `${NAME}` placeholders in every string of `config`.
///
/// Missing secrets become the empty string. Object keys are left alone.
pub fn resolve_secrets(config: &Value, secrets: &dyn SecretSource) -> Value {
    match config {
        Value::String(s) => Value::String(substitute(s, secrets)),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| resolve_secrets(item, secrets))
                .collect(),
        ),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_secrets(v, secrets)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn substitute(text: &str, secrets: &dyn SecretSource) -> String {
    if !text.contains("${") {
        return text.to_string();
    }
    placeholder()
        .replace_all(text, |caps: &Captures| secrets.get(&caps[1]).unwrap_or_default())
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secrets() -> SecretMap {
        let mut map = SecretMap::new();
        map.insert("API_KEY".into(), "sk-123".into());
        map.insert("HOST".into(), "api.github.com".into());
        map
    }

    #[test]
    fn test_resolves_nested_values() {
        let config = json!({
            "url": "https://${HOST}/repos",
            "headers": { "Authorization": "Bearer ${API_KEY}" },
            "list": ["${API_KEY}", 3, true, null],
            "retries": 2
        });
        let resolved = resolve_secrets(&config, &secrets());
        assert_eq!(resolved["url"], "https://api.github.com/repos");
        assert_eq!(resolved["headers"]["Authorization"], "Bearer sk-123");
        assert_eq!(resolved["list"], json!(["sk-123", 3, true, null]));
        assert_eq!(resolved["retries"], 2);
    }

    #[test]
    fn test_missing_secret_becomes_empty() {
        let resolved = resolve_secrets(&json!("token=${NOPE};"), &secrets());
        assert_eq!(resolved, json!("token=;"));
    }

    #[test]
    fn test_does_not_mutate_input() {
        let config = json!({ "k": "${API_KEY}" });
        let _ = resolve_secrets(&config, &secrets());
        assert_eq!(config["k"], "${API_KEY}");
    }

    #[test]
    fn test_keys_and_non_placeholders_untouched() {
        let config = json!({ "${API_KEY}": "$API_KEY and ${ not closed" });
        let resolved = resolve_secrets(&config, &secrets());
        assert_eq!(resolved, config);
    }

    #[test]
    fn test_shared_secrets_rotation() {
        let shared = SharedSecrets::new(secrets());
        assert_eq!(
            resolve_secrets(&json!("${API_KEY}"), &shared),
            json!("sk-123")
        );
        shared.set("API_KEY", "sk-rotated");
        assert_eq!(
            resolve_secrets(&json!("${API_KEY}"), &shared),
            json!("sk-rotated")
        );
        shared.rotate(SecretMap::new());
        assert_eq!(resolve_secrets(&json!("${API_KEY}"), &shared), json!(""));
    }
}

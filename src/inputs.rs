//! Loading run inputs from the command line and the environment.

use std::ffi::OsString;
use std::path::Path;

use anyhow::{bail, Context};
use serde_json::Value;

use dagrun_core::graph::GraphDocument;
use dagrun_core::secrets::SecretMap;

/// Environment variables with this prefix are added to the secret map.
pub const SECRET_ENV_PREFIX: &str = "DAGRUN_SECRET_";

pub fn read_graph(path: &Path) -> anyhow::Result<GraphDocument> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read graph {}", path.display()))?;
    GraphDocument::from_json(&text).with_context(|| format!("invalid graph {}", path.display()))
}

/// `--input` value: inline JSON, `@path` to a JSON file, or a bare string.
pub fn parse_input(raw: Option<&str>) -> anyhow::Result<Value> {
    let Some(raw) = raw else {
        return Ok(Value::Null);
    };
    if let Some(path) = raw.strip_prefix('@') {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path))?;
        return serde_json::from_str(&text).with_context(|| format!("invalid JSON in {}", path));
    }
    Ok(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string())))
}

/// Secrets from an optional JSON file, then `DAGRUN_SECRET_*` variables.
/// Environment values win over the file; variables that are not valid
/// Unicode are skipped.
pub fn load_secrets<I, K, V>(file: Option<&Path>, env: I) -> anyhow::Result<SecretMap>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<OsString>,
    V: Into<OsString>,
{
    let mut secrets = SecretMap::new();
    if let Some(path) = file {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read secrets {}", path.display()))?;
        let value: Value = serde_json::from_str(&text)
            .with_context(|| format!("invalid JSON in {}", path.display()))?;
        let Value::Object(map) = value else {
            bail!("secrets file must be a JSON object of strings");
        };
        for (name, value) in map {
            match value {
                Value::String(s) => {
                    secrets.insert(name, s);
                }
                other => bail!("secret '{}' must be a string, got {}", name, other),
            }
        }
    }
    for (key, value) in env {
        let (Ok(key), Ok(value)) = (key.into().into_string(), value.into().into_string()) else {
            continue;
        };
        if let Some(name) = key.strip_prefix(SECRET_ENV_PREFIX) {
            if !name.is_empty() {
                secrets.insert(name.to_string(), value);
            }
        }
    }
    Ok(secrets)
}

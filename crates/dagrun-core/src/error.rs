use thiserror::Error;

#[derive(Debug, Error)]
pub enum DagrunError {
    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Graph errors
    #[error("Graph error: {0}")]
    Graph(String),

    #[error("invalid config for {kind} node: {message}")]
    NodeConfig { kind: String, message: String },

    // Egress policy violations
    #[error("method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("host not allowed: {0}")]
    HostNotAllowed(String),

    #[error("body too large: {size} bytes exceeds limit of {limit}")]
    BodyTooLarge { size: usize, limit: usize },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    // Execution errors
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("script error: {0}")]
    Script(String),

    #[error("script timed out after {0}ms")]
    ScriptTimeout(u64),

    #[error("attempt timed out after {0}ms")]
    AttemptTimeout(u64),

    // Connector errors
    #[error("Connector error: {connector}: {message}")]
    Connector { connector: String, message: String },

    #[error("connector not configured: {0}")]
    ConnectorNotConfigured(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DagrunError>;

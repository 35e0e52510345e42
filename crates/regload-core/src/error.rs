//! Error types for regload-core

use thiserror::Error;

/// Errors from the work-item source.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Dataset missing, unreadable or malformed
    #[error("Failed to load dataset {path}: {reason}")]
    DataLoad { path: String, reason: String },

    /// Every loaded item has been issued
    #[error("No more test data available")]
    Exhausted,

    /// `next()` called before a successful `load()`
    #[error("Dataset not loaded")]
    NotLoaded,
}

/// Errors from loading configuration and request templates.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required configuration file absent
    #[error("Config file not found: {0}")]
    NotFound(String),

    /// File present but unreadable or not valid YAML/JSON
    #[error("Failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    /// Required field, endpoint or template absent
    #[error("Missing configuration: {0}")]
    Missing(String),
}

/// Errors from the HTTP transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Request could not be sent or the response body could not be read
    #[error("HTTP error: {0}")]
    Http(String),

    /// Client could not be constructed
    #[error("HTTP client setup failed: {0}")]
    Setup(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        TransportError::Http(err.to_string())
    }
}

/// Errors from the container tool.
#[derive(Error, Debug)]
pub enum ContainerError {
    /// Executable could not be started
    #[error("Failed to spawn {tool}: {reason}")]
    Spawn { tool: String, reason: String },

    /// Invocation exceeded its timeout
    #[error("{tool} {subcommand} timed out after {secs} seconds")]
    Timeout {
        tool: String,
        subcommand: String,
        secs: u64,
    },

    /// Invocation exited non-zero
    #[error("{subcommand} exited with code {code}: {stderr}")]
    NonZeroExit {
        subcommand: String,
        code: i32,
        stderr: String,
    },

    /// Credential file could not be prepared
    #[error("Credential setup failed: {0}")]
    Credentials(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single workflow step failed. Always absorbed at the step boundary.
#[derive(Error, Debug)]
pub enum StepFailure {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: u16, body: String },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("request template: {0}")]
    Template(String),

    #[error("credentials: {0}")]
    Credentials(String),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("container tool: {0}")]
    Container(#[from] ContainerError),

    #[error("step panicked: {0}")]
    Panicked(String),
}

/// Result type for source operations
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Result type for configuration loading
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

//! Error types for regload-metrics

use thiserror::Error;

/// Errors raised while delivering points to a sink.
#[derive(Error, Debug)]
pub enum SinkError {
    /// The sink endpoint could not be reached
    #[error("HTTP error: {0}")]
    Http(String),

    /// The sink answered with a non-success status
    #[error("Sink rejected write ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// Point could not be serialized
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<reqwest::Error> for SinkError {
    fn from(err: reqwest::Error) -> Self {
        SinkError::Http(err.to_string())
    }
}

/// Result type for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

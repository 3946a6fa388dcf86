//! Client error types

use std::time::Duration;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Client errors
#[derive(Error, Debug)]
pub enum ClientError {
    /// Connection or protocol failure inside the HTTP stack
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Request exceeded its per-request timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Server answered with a non-success HTTP status
    #[error("HTTP status {status}: {message}")]
    Status { status: u16, message: String },

    /// Decoded body carried a non-zero `code`
    #[error("API error ({code}): {msg}")]
    Api { code: i64, msg: String },

    /// Local file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Upload block accounting went wrong
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Body was not the JSON we expected
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied data the server would reject
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A pooled request task panicked or was cancelled
    #[error("task failed: {0}")]
    Task(String),
}

impl ClientError {
    /// Build a status error, lifting `msg` out of a JSON envelope when present
    pub fn from_status(status: u16, body: &[u8]) -> Self {
        let message = serde_json::from_slice::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("msg").and_then(|m| m.as_str()).map(str::to_string))
            .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());

        Self::Status { status, message }
    }

    /// Transport-class failures: worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Timeout(_) | Self::Status { .. })
    }

    /// Check if the server rejected the request at the application level
    pub fn is_api_error(&self) -> bool {
        matches!(self, Self::Api { .. })
    }

    /// The application error code, if any
    pub fn api_code(&self) -> Option<i64> {
        match self {
            Self::Api { code, .. } => Some(*code),
            _ => None,
        }
    }
}

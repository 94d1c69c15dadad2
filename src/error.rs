// src/error.rs

//! Unified error handling for the sync pipeline.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for sync operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error (fatal for a task, never retried)
    #[error("Validation error: {0}")]
    Validation(String),

    /// An operation did not finish in time
    #[error("{context} timed out after {}ms", elapsed.as_millis())]
    Timeout { context: String, elapsed: Duration },

    /// Object store upload failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Sync backend rejected a request or answered unexpectedly
    #[error("Backend error: {0}")]
    Backend(String),

    /// Media relay job failed
    #[error("Relay error: {0}")]
    Relay(String),

    /// Image decryption failed
    #[error("Decrypt error: {0}")]
    Decrypt(String),

    /// Fetching a page or detail payload failed
    #[error("Fetch error for {context}: {message}")]
    Fetch { context: String, message: String },

    /// Page content could not be parsed into an item
    #[error("Parse error: {0}")]
    Parse(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a timeout error.
    pub fn timeout(context: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            context: context.into(),
            elapsed,
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Create a backend error.
    pub fn backend(message: impl fmt::Display) -> Self {
        Self::Backend(message.to_string())
    }

    /// Create a relay error.
    pub fn relay(message: impl fmt::Display) -> Self {
        Self::Relay(message.to_string())
    }

    /// Create a fetch error with context.
    pub fn fetch(context: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            context: context.into(),
            message: message.to_string(),
        }
    }

    /// Create a parse error.
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    /// Whether retrying the same request could succeed.
    ///
    /// Validation, configuration and parse failures are deterministic.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http(_) | Self::Io(_) | Self::Timeout { .. } | Self::Storage(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

//! Error types for sheetsync-core

use thiserror::Error;

/// Main error type for the sheetsync-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file parsing error
    #[error("config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Smartsheet API returned a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Request never produced a response (DNS, connect, TLS, timeout)
    #[error("HTTP request failed: {0}")]
    Transport(String),

    /// Sheet not found in the workspace or on the server
    #[error("sheet not found: {0}")]
    SheetNotFound(i64),
}

impl Error {
    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Transport(_) => true,
            Error::Api { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

/// Result type alias for sheetsync-core
pub type Result<T> = std::result::Result<T, Error>;

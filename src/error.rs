//! Error types for the Boldem transport.

use thiserror::Error;

/// Result type for transport operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Errors that can occur while talking to the Boldem API.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing or malformed configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The OAuth endpoint did not hand out an access token.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Network or protocol failure below the HTTP status level.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Payload or response (de)serialization failure.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

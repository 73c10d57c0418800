//! Error types for QwenRelay.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Browser or context not initialized; fatal to the request, not retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Recoverable by running the interactive authentication flow.
    #[error("Authentication required: {0}")]
    AuthRequired(String),

    /// Recoverable by extracting the token from a live page.
    #[error("Authorization token missing: {0}")]
    TokenMissing(String),

    /// Anti-bot verification challenge; requires relaunching in visible mode.
    #[error("Verification challenge: {0}")]
    Verification(String),

    /// Network/HTTP/parse failure from the completion endpoint.
    #[error("Remote call failed: {0}")]
    RemoteCall(String),

    #[error("Browser error: {0}")]
    Browser(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Error types for catalogue-link.

use thiserror::Error;

/// Errors produced by the session layer and the bundled transport.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LinkError {
    /// Missing or invalid configuration. Fatal: raised before any connection attempt.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// The server rejected the login digest.
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// A remote method returned an error payload.
    #[error("Remote error in '{method}': {message}")]
    RemoteError {
        /// Method (or subscription) name that failed.
        method: String,
        /// Error text reported by the server.
        message: String,
    },

    #[error("Timeout: {0}")]
    TimeoutError(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The server refused or dropped a subscription (`nosub`).
    #[error("Subscription '{name}' failed: {message}")]
    SubscriptionError {
        /// Subscription name.
        name: String,
        /// Error text reported by the server.
        message: String,
    },

    /// An operation needed a live connection and there was none.
    #[error("Not connected")]
    NotConnected,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl LinkError {
    /// Whether the session recovers from this error by reconnecting.
    ///
    /// Only configuration errors abort the whole system.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, LinkError::ConfigurationError(_))
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        LinkError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LinkError::TimeoutError(err.to_string())
        } else {
            LinkError::HttpError(err.to_string())
        }
    }
}

/// Result type for catalogue-link operations.
pub type Result<T> = std::result::Result<T, LinkError>;

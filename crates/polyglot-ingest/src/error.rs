//! Error types for the ingestion subsystem.
//!
//! Per-relay failures (connect errors, timeouts, malformed frames) are not
//! surfaced through this type to callers of a fetch: the fetcher turns them
//! into status values. The variants here are what the individual layers
//! report to each other and what is fatal for a whole run.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during ingestion and caching.
#[derive(Error, Debug)]
pub enum Error {
    /// The relay socket could not be opened.
    #[error("failed to connect to {relay}: {reason}")]
    ConnectFailure {
        /// Relay address.
        relay: String,
        /// Underlying cause.
        reason: String,
    },

    /// The relay socket was not opened within the connect timeout.
    #[error("timed out connecting to {relay} after {timeout:?}")]
    ConnectTimeout {
        /// Relay address.
        relay: String,
        /// Configured connect timeout.
        timeout: Duration,
    },

    /// The relay socket closed before a frame could be sent.
    #[error("connection to {0} is closed")]
    ConnectionClosed(String),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A relay frame that could not be decoded.
    #[error("malformed relay message: {0}")]
    MalformedMessage(String),

    /// Cache database error with context.
    #[error("Database error: {0}")]
    Database(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The analysis engine failed or returned an unusable shape.
    #[error("Analysis engine error: {0}")]
    Engine(String),

    /// Invalid configuration or request, rejected before any I/O.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Relay URL validation error.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_timeout_display() {
        let err = Error::ConnectTimeout {
            relay: "wss://relay.example.com".to_string(),
            timeout: Duration::from_secs(10),
        };
        let msg = err.to_string();
        assert!(msg.contains("relay.example.com"));
        assert!(msg.contains("10s"));
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}

//! Error types shared across the polyglot crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling records and derived data.
#[derive(Error, Debug)]
pub enum Error {
    /// A record field has an invalid format (e.g., wrong hex length).
    #[error("invalid field '{field}': {reason}")]
    InvalidField {
        /// The name of the invalid field.
        field: &'static str,
        /// Description of what's wrong.
        reason: String,
    },

    /// A metric name that doesn't map to a known activity window.
    #[error("unknown metric '{0}' (expected one of dau, wau, mau, yau)")]
    UnknownMetric(String),
}

//! Error types for the Floodgate service.

use thiserror::Error;

/// Main error type for Floodgate operations.
///
/// Throttling is not an error: a denied request is a [`Decision`] with
/// `allowed == false`. Every variant here is a configuration or
/// infrastructure fault.
///
/// [`Decision`]: crate::ratelimit::Decision
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// A check referenced a rule that was never registered
    #[error("Configuration error: unknown rate limit rule '{0}'")]
    UnknownRule(String),

    /// A rule failed validation at registration time
    #[error("Configuration error: invalid rate limit rule '{name}': {reason}")]
    InvalidRule { name: String, reason: String },

    /// Errors from the layered configuration loader
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] config::ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FloodgateError {
    /// Whether this error stems from configuration rather than the runtime.
    ///
    /// All current variants except I/O are configuration faults, which the
    /// HTTP layer reports as server errors rather than throttling.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, FloodgateError::Io(_))
    }
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;

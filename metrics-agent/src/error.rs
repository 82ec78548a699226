//! Agent error types.

use std::time::Duration;

use thiserror::Error;

/// Agent result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Agent error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Server responded with {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Delivery attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("Encoding error: {0}")]
    Encode(#[from] metrics_model::Error),

    #[error("Rate limiter closed")]
    Limiter,

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether a delivery failing with this error may succeed on another attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Encode(_) | Self::Limiter | Self::Configuration(_))
    }
}

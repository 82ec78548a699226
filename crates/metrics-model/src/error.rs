use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while encoding or decoding metric payloads.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Compression error: {0}")]
    Compression(#[from] std::io::Error),

    #[error("Invalid metric type: {0}")]
    InvalidType(String),
}

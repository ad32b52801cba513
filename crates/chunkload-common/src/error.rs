//! Error types shared by chunkload crates

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised while reading configuration from the environment
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),

    #[error("Invalid value for {key}: {value:?} ({reason})")]
    InvalidVar {
        key: String,
        value: String,
        reason: String,
    },
}

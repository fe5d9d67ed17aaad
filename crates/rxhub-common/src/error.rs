//! Error types shared across RxHub crates

use thiserror::Error;

/// Result type alias for RxHub operations
pub type Result<T> = std::result::Result<T, RxhubError>;

/// Main error type for RxHub
#[derive(Error, Debug)]
pub enum RxhubError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("Pharmacy not found: {0}")]
    PharmacyNotFound(String),

    #[error("Batch not found: {0}")]
    BatchNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid pubkey: {0}")]
    InvalidPubkey(String),

    #[error("invalid unique id: {0}")]
    InvalidUniqueId(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    #[error("unsupported api type: {0}")]
    UnsupportedApiType(i32),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

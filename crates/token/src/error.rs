//! Error types for credential parsing and attenuation.

use thiserror::Error;

/// Credential handling errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("invalid base64 encoding: {0}")]
    InvalidBase64(String),

    #[error("invalid macaroon: {0}")]
    InvalidMacaroon(String),

    #[error("invalid rune: {0}")]
    InvalidRune(String),

    #[error("duration too long")]
    DurationTooLong,

    #[error("timestamp formatting failed: {0}")]
    TimestampFormat(String),
}

/// Result type for credential operations.
pub type Result<T> = std::result::Result<T, Error>;

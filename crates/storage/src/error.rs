//! Storage error types.

use thiserror::Error;

/// Storage operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("secret not found: {0}")]
    NotFound(String),

    #[error("AWS error: {0}")]
    Aws(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("upstream returned status {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether retrying the operation can plausibly help.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::Config(_) | Self::InvalidPayload(_) => false,
            Self::Aws(_) | Self::Http(_) => true,
            // client errors won't heal; 5xx and 429 might
            Self::UpstreamStatus { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

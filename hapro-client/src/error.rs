//! Error types for hapro-client.

use std::time::Duration;

use thiserror::Error;

use hapro_core::ConfigError;

/// Result type alias for outbound calls.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors from calls to the token endpoint, the external service, or the
/// backend.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Transport-level failure (connect, TLS, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The peer answered with a non-success status.
    #[error("{url} answered {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    /// The peer answered 2xx but the body was not the expected shape.
    #[error("invalid response from {url}: {message}")]
    Decode { url: String, message: String },

    /// A setting required for this call is missing or unreadable.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The call did not finish within its bound.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
}

pub(crate) fn decode_err(url: &str, message: impl Into<String>) -> ClientError {
    ClientError::Decode {
        url: url.to_string(),
        message: message.into(),
    }
}

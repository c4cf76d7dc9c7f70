use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the relay runtime, subscription channel, and HTTP surface.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("notify error: {0}")]
    Notify(#[from] notify::Error),

    #[error("config error: {0}")]
    Config(#[from] hapro_core::ConfigError),

    #[error("outbound error: {0}")]
    Client(#[from] hapro_client::ClientError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("subscription channel error: {0}")]
    Channel(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("daemon protocol error: {0}")]
    Protocol(String),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}

//! Error types for the registry mirror.

use thiserror::Error;

/// Main error type for mirror operations.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid value for `{key}`: {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error("Invalid server address: {0}")]
    InvalidServerAddress(String),

    #[error("Failed to connect to registry at {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Registry client is shut down")]
    ClientShutdown,

    #[error("Malformed instance: {0}")]
    MalformedInstance(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Mirror already started")]
    AlreadyStarted,

    #[error("Invalid lifecycle state: {0}")]
    InvalidState(String),
}

impl MirrorError {
    pub(crate) fn config(key: &str, reason: impl Into<String>) -> Self {
        MirrorError::InvalidConfig {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(e: serde_json::Error) -> Self {
        MirrorError::Serialization(e.to_string())
    }
}

/// Result type for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;

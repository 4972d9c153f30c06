//! Error types for the key manager.

use keystead_channel::ChannelError;
use keystead_core::{CoreError, IntegrityViolation};
use keystead_store::StoreError;
use thiserror::Error;

use crate::protocol::ErrorCode;

/// Errors that can occur in key manager operations.
#[derive(Debug, Error)]
pub enum KeyManagerError {
    /// Persisted state failed an integrity check
    #[error("Integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Malformed or oversized wire frame
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Error response from a remote key manager
    #[error("Remote error ({code}): {message}")]
    Remote { code: ErrorCode, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl KeyManagerError {
    /// Whether the service must stop serving.
    pub fn is_fatal(&self) -> bool {
        match self {
            KeyManagerError::Integrity(_) => true,
            KeyManagerError::Store(e) => e.is_fatal(),
            KeyManagerError::Core(e) => e.is_fatal(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for KeyManagerError {
    fn from(err: serde_json::Error) -> Self {
        KeyManagerError::Protocol(err.to_string())
    }
}

/// Result type for key manager operations.
pub type KeyManagerResult<T> = Result<T, KeyManagerError>;

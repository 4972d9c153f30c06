//! Error types for the signed record store.

use keystead_core::IntegrityViolation;
use keystead_crypto::SigningError;
use thiserror::Error;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Persisted state failed an integrity check. Fatal.
    #[error("Integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl StoreError {
    /// Whether the caller must stop serving from this store.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::Integrity(_))
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

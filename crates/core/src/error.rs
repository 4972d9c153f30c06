//! Core error types

use thiserror::Error;

/// A broken integrity invariant of the persisted state.
///
/// These are never routed around: a store that produced one of them is not
/// trusted any more and the service must stop serving from it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    /// Stored value is too short to carry a signature
    #[error("record '{key}' is {len} bytes, shorter than its signature")]
    TruncatedRecord { key: String, len: usize },

    /// Trailing signature does not verify against the local public key
    #[error("signature mismatch on record '{key}'")]
    BadSignature { key: String },

    /// Payload verified but could not be decoded
    #[error("malformed record '{key}': {reason}")]
    MalformedRecord { key: String, reason: String },

    /// Record key prefix is not part of the on-disk format
    #[error("unknown record type '{record_type}' in key '{key}'")]
    UnknownRecordType { key: String, record_type: String },

    /// Public key derived from the stored seed differs from the storage key
    #[error("public key mismatch for record '{key}': derived {derived}")]
    PublicKeyMismatch { key: String, derived: String },

    /// Persisted config version is ahead of the configuration source
    #[error("stored config version {stored} is ahead of source version {source_version}")]
    ConfigVersionAhead { stored: u32, source_version: u32 },

    /// A key claims a config version newer than the active one
    #[error("key '{key}' minted under config version {key_version}, active is {active}")]
    KeyVersionAhead {
        key: String,
        key_version: u32,
        active: u32,
    },
}

/// Core error type for Keystead
#[derive(Debug, Error)]
pub enum CoreError {
    /// Generic error
    #[error("Core error: {0}")]
    Generic(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Integrity violation
    #[error("Integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether the caller must stop operating on the current state.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Integrity(_))
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

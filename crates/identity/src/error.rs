//! Error types for Keystead identity operations.

use thiserror::Error;

/// Reasons an attestation policy rejects a peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Quote bytes could not be decoded
    #[error("malformed quote: {0}")]
    MalformedQuote(String),

    /// Quote is not bound to the certificate key the peer presented
    #[error("quote does not cover the presented user claims")]
    ClaimsMismatch,

    /// Image hash is not on the policy allow-list
    #[error("image {image_hash} is not allowed")]
    ImageNotAllowed { image_hash: String },

    /// Peer certificate does not carry usable evidence
    #[error("missing evidence: {0}")]
    MissingEvidence(String),
}

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Certificate generation or parsing errors
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Quote generation errors
    #[error("Quote error: {0}")]
    Quote(String),

    /// Attestation policy rejected the evidence
    #[error("Attestation failed: {0}")]
    Policy(#[from] PolicyError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<rcgen::Error> for IdentityError {
    fn from(err: rcgen::Error) -> Self {
        IdentityError::Certificate(err.to_string())
    }
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;

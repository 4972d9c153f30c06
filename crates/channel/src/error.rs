//! Error types for channel establishment.

use keystead_identity::{IdentityError, PolicyError};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while establishing or running a channel.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Policy rejected the peer's evidence
    #[error("Attestation rejected: {0}")]
    Attestation(#[from] PolicyError),

    /// Handshake did not finish before the deadline
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Handshake finished without the policy ever resolving the peer
    #[error("Peer identity was never resolved")]
    PeerUnverified,

    /// TLS configuration errors
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Local certificate errors
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Transport errors, including failed handshakes
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for channel operations.
pub type ChannelResult<T> = Result<T, ChannelError>;

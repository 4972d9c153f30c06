//! Attested identity for Keystead endpoints.
//!
//! This crate defines what a peer proves about itself and how that proof is
//! judged, without performing any transport work.
//!
//! # Core Concepts
//!
//! - **Quote**: opaque evidence of the image a peer runs, bound to the key
//!   of its TLS certificate
//! - **Policy**: injected capability deciding whether a quote is acceptable
//! - **AttestedPeerInfo**: verified identity of one established channel
//!
//! # Security Model
//!
//! Certificates are self-signed and minted per process. Trust never comes
//! from the certificate chain, only from the policy's verdict on the quote
//! carried inside the certificate.

pub mod attestation;
pub mod error;
pub mod pki;

pub use attestation::{
    AttestationData, AttestationType, AttestedPeerInfo, FakeQuotePolicy, FakeQuoteProvider,
    InsecurePolicy, Policy, PolicyRef, Quote, QuoteProvider, UserClaims,
};
pub use error::{IdentityError, IdentityResult, PolicyError};
pub use pki::{extract_evidence, CertAndKey, PeerEvidence, DEFAULT_SERVER_NAME, QUOTE_EXTENSION_OID};

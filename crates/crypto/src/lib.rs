//! Cryptographic primitives for the Keystead key distribution service.
//!
//! # Core Capabilities
//!
//! - **Record Signatures**: Ed25519 signing and strict verification of every
//!   persisted record with the machine key
//! - **Key Material**: secure generation of distributed Ed25519 seeds and
//!   deterministic public key derivation
//!
//! # Security Principles
//!
//! - All persisted records must be signed
//! - All signatures must be verified before trust
//! - Secrets must never be logged; seeds are zeroized on drop

pub mod keys;
pub mod signing;

pub use keys::{derive_public_key, short_key_id, SecretSeed};
pub use signing::{
    verify_with, RecordSigner, SigningCounts, SigningError, SigningMetrics, SIGNATURE_LEN,
};

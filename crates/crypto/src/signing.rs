//! Record Signing Service - integrity layer for persisted records.
//!
//! Every value the key manager writes to local disk is signed with the
//! machine key, and every value read back is verified against the matching
//! public key before it is used.
//!
//! # Security Model
//!
//! - Signatures are integrity-only; payloads are stored in the clear
//! - The machine seed is zeroized after the signing key is built
//! - Verification is strict (`verify_strict`), rejecting malleable encodings

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use zeroize::Zeroize;

/// Length of an Ed25519 signature appended to every record.
pub const SIGNATURE_LEN: usize = 64;

/// Errors that can occur during signing operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("Invalid key length: {len} (expected 32)")]
    InvalidKeyLength { len: usize },

    #[error("Invalid signature length: {len} (expected 64)")]
    InvalidSignatureLength { len: usize },

    #[error("Signature verification failed")]
    VerificationFailed,
}

/// Metrics for observability.
#[derive(Debug, Default)]
pub struct SigningMetrics {
    pub records_signed_total: AtomicU64,
    pub records_verified_total: AtomicU64,
    pub verification_failures_total: AtomicU64,
}

impl SigningMetrics {
    /// Point-in-time copy of the counters.
    pub fn snapshot(&self) -> SigningCounts {
        SigningCounts {
            signed: self.records_signed_total.load(Ordering::Relaxed),
            verified: self.records_verified_total.load(Ordering::Relaxed),
            verification_failures: self.verification_failures_total.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`SigningMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SigningCounts {
    pub signed: u64,
    pub verified: u64,
    pub verification_failures: u64,
}

/// Signs and verifies stored records with the machine key.
pub struct RecordSigner {
    /// Machine signing key
    signing_key: SigningKey,
    /// Cached public half
    verifying_key: VerifyingKey,
    /// Metrics counters
    metrics: SigningMetrics,
}

impl RecordSigner {
    /// Build a signer from the 32-byte machine seed.
    ///
    /// # Security
    /// The local copy of the seed is zeroized after use.
    pub fn from_seed(seed: &[u8]) -> Result<Self, SigningError> {
        if seed.len() != 32 {
            return Err(SigningError::InvalidKeyLength { len: seed.len() });
        }

        let mut key_array = [0u8; 32];
        key_array.copy_from_slice(seed);
        let signing_key = SigningKey::from_bytes(&key_array);
        key_array.zeroize();

        let verifying_key = signing_key.verifying_key();
        Ok(Self {
            signing_key,
            verifying_key,
            metrics: SigningMetrics::default(),
        })
    }

    /// Public key bytes records are verified against.
    pub fn public_key(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    /// Sign a payload, returning the detached 64-byte signature.
    pub fn sign(&self, payload: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.metrics
            .records_signed_total
            .fetch_add(1, Ordering::Relaxed);
        self.signing_key.sign(payload).to_bytes()
    }

    /// Produce `payload || signature`.
    pub fn seal(&self, payload: &[u8]) -> Vec<u8> {
        let mut sealed = Vec::with_capacity(payload.len() + SIGNATURE_LEN);
        sealed.extend_from_slice(payload);
        sealed.extend_from_slice(&self.sign(payload));
        sealed
    }

    /// Verify a detached signature against the local public key.
    pub fn verify(&self, payload: &[u8], signature: &[u8]) -> Result<(), SigningError> {
        let result = verify_with(&self.verifying_key, payload, signature);
        self.metrics
            .records_verified_total
            .fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.metrics
                .verification_failures_total
                .fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Gets a snapshot of current metrics.
    pub fn metrics(&self) -> &SigningMetrics {
        &self.metrics
    }
}

impl std::fmt::Debug for RecordSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordSigner")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

/// Verify `signature` over `payload` with an arbitrary Ed25519 public key.
pub fn verify_with(
    verifying_key: &VerifyingKey,
    payload: &[u8],
    signature: &[u8],
) -> Result<(), SigningError> {
    let bytes: [u8; SIGNATURE_LEN] =
        signature
            .try_into()
            .map_err(|_| SigningError::InvalidSignatureLength {
                len: signature.len(),
            })?;
    let signature = Signature::from_bytes(&bytes);
    verifying_key
        .verify_strict(payload, &signature)
        .map_err(|_| SigningError::VerificationFailed)
}

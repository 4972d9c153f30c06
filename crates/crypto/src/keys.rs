//! Distributed key material.
//!
//! Keys handed to proxies and workers are plain Ed25519 seeds. The public
//! half is never stored on its own; it is always re-derived from the seed.

use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// 32-byte Ed25519 secret seed, wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretSeed([u8; 32]);

impl SecretSeed {
    /// Draw a fresh seed from the operating system RNG.
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Ed25519 public key for this seed.
    pub fn public_key(&self) -> [u8; 32] {
        derive_public_key(&self.0)
    }
}

impl std::fmt::Debug for SecretSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretSeed(..)")
    }
}

/// Derive the Ed25519 public key of a 32-byte seed.
pub fn derive_public_key(seed: &[u8; 32]) -> [u8; 32] {
    SigningKey::from_bytes(seed).verifying_key().to_bytes()
}

/// Short hex identifier used in log lines (first 8 bytes of the public key).
pub fn short_key_id(public_key: &[u8; 32]) -> String {
    hex::encode(&public_key[..8])
}

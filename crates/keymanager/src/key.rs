//! Managed signing keys.

use keystead_core::IntegrityViolation;
use keystead_crypto::{derive_public_key, short_key_id, SecretSeed};
use keystead_store::records::key_record_key;
use keystead_store::StoredKey;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifetime of a freshly generated key, in seconds.
pub const KEY_TTL_SECS: i64 = 86_400;

/// Consumer role a key is handed out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Proxy,
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Proxy => f.write_str("proxy"),
            Role::Worker => f.write_str("worker"),
        }
    }
}

/// A signing key owned by the lifecycle manager.
#[derive(Clone)]
pub struct KeyRecord {
    seed: SecretSeed,
    public_key: [u8; 32],
    pub for_proxies: bool,
    pub for_workers: bool,
    pub valid_since: i64,
    pub valid_until: i64,
    pub valid_since_config_version: u32,
}

impl KeyRecord {
    /// Fresh random key valid for [`KEY_TTL_SECS`] from `now`.
    pub fn generate(for_proxies: bool, for_workers: bool, now: i64, config_version: u32) -> Self {
        let seed = SecretSeed::generate();
        let public_key = seed.public_key();
        Self {
            seed,
            public_key,
            for_proxies,
            for_workers,
            valid_since: now,
            valid_until: now + KEY_TTL_SECS,
            valid_since_config_version: config_version,
        }
    }

    /// Rebuild a key from its persisted form.
    ///
    /// The public key re-derived from the stored seed must match the one
    /// encoded in the storage key.
    pub fn from_stored(expected_public_key: &[u8; 32], stored: &StoredKey) -> Result<Self, IntegrityViolation> {
        let public_key = derive_public_key(&stored.private_key);
        if &public_key != expected_public_key {
            return Err(IntegrityViolation::PublicKeyMismatch {
                key: key_record_key(expected_public_key),
                derived: hex::encode(public_key),
            });
        }
        Ok(Self {
            seed: SecretSeed::from_bytes(stored.private_key),
            public_key,
            for_proxies: stored.for_proxies,
            for_workers: stored.for_workers,
            valid_since: stored.valid_since,
            valid_until: stored.valid_until,
            valid_since_config_version: stored.valid_since_config_version,
        })
    }

    pub fn to_stored(&self) -> StoredKey {
        StoredKey {
            private_key: *self.seed.as_bytes(),
            for_workers: self.for_workers,
            for_proxies: self.for_proxies,
            valid_since_config_version: self.valid_since_config_version,
            valid_since: self.valid_since,
            valid_until: self.valid_until,
        }
    }

    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }

    pub fn seed(&self) -> &SecretSeed {
        &self.seed
    }

    pub fn storage_key(&self) -> String {
        key_record_key(&self.public_key)
    }

    pub fn key_id(&self) -> String {
        short_key_id(&self.public_key)
    }

    /// A key is expired once `valid_until` is reached.
    pub fn is_expired(&self, now: i64) -> bool {
        self.valid_until <= now
    }

    pub fn serves(&self, role: Role) -> bool {
        match role {
            Role::Proxy => self.for_proxies,
            Role::Worker => self.for_workers,
        }
    }
}

impl fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyRecord")
            .field("public_key", &hex::encode(self.public_key))
            .field("for_proxies", &self.for_proxies)
            .field("for_workers", &self.for_workers)
            .field("valid_since", &self.valid_since)
            .field("valid_until", &self.valid_until)
            .field("valid_since_config_version", &self.valid_since_config_version)
            .finish_non_exhaustive()
    }
}

//! On-disk record schemas and the key namespacing convention.
//!
//! Storage keys are `"<type>_<id>"`; a key without `_` is its own type.
//! Only two types exist: `key_<hex public key>` for managed keys and the
//! `config` singleton.

use keystead_core::IntegrityViolation;
use serde::{Deserialize, Serialize};

/// Storage key of the configuration singleton.
pub const CONFIG_KEY: &str = "config";

/// Type prefix of managed key records.
pub const KEY_PREFIX: &str = "key";

/// Parsed storage key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordKind {
    /// `key_<hex>` with the decoded public key
    Key([u8; 32]),
    /// `config`
    Config,
}

/// Split a storage key into its type and id parts.
pub fn split_type(key: &str) -> (&str, Option<&str>) {
    match key.split_once('_') {
        Some((record_type, id)) => (record_type, Some(id)),
        None => (key, None),
    }
}

/// Storage key for a managed key record.
pub fn key_record_key(public_key: &[u8; 32]) -> String {
    format!("{}_{}", KEY_PREFIX, hex::encode(public_key))
}

impl RecordKind {
    /// Classify a storage key. Unknown types are integrity violations.
    pub fn parse(key: &str) -> Result<Self, IntegrityViolation> {
        match split_type(key) {
            (KEY_PREFIX, Some(id)) => {
                let mut public_key = [0u8; 32];
                hex::decode_to_slice(id, &mut public_key).map_err(|e| {
                    IntegrityViolation::MalformedRecord {
                        key: key.to_string(),
                        reason: format!("bad public key suffix: {e}"),
                    }
                })?;
                Ok(RecordKind::Key(public_key))
            }
            (CONFIG_KEY, None) => Ok(RecordKind::Config),
            (record_type, _) => Err(IntegrityViolation::UnknownRecordType {
                key: key.to_string(),
                record_type: record_type.to_string(),
            }),
        }
    }
}

/// Persisted form of a managed key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    #[serde(with = "hex::serde")]
    pub private_key: [u8; 32],
    pub for_workers: bool,
    pub for_proxies: bool,
    pub valid_since_config_version: u32,
    pub valid_since: i64,
    pub valid_until: i64,
}

impl std::fmt::Debug for StoredKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredKey")
            .field("for_workers", &self.for_workers)
            .field("for_proxies", &self.for_proxies)
            .field("valid_since_config_version", &self.valid_since_config_version)
            .field("valid_since", &self.valid_since)
            .field("valid_until", &self.valid_until)
            .finish_non_exhaustive()
    }
}

/// Persisted configuration singleton, tagged by schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "camelCase")]
pub enum ConfigRecord {
    ConfigEmpty,
    ConfigV1 { root_contract_version: u32 },
}

impl ConfigRecord {
    /// Active contract version recorded here; `0` for the empty schema.
    pub fn root_contract_version(&self) -> u32 {
        match self {
            ConfigRecord::ConfigEmpty => 0,
            ConfigRecord::ConfigV1 {
                root_contract_version,
            } => *root_contract_version,
        }
    }
}

impl Default for ConfigRecord {
    fn default() -> Self {
        ConfigRecord::ConfigEmpty
    }
}

/// Encode a record payload.
pub fn encode<T: Serialize>(record: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(record)
}

/// Decode a verified payload, reporting failures as integrity violations.
pub fn decode<T: for<'de> Deserialize<'de>>(
    key: &str,
    payload: &[u8],
) -> Result<T, IntegrityViolation> {
    serde_json::from_slice(payload).map_err(|e| IntegrityViolation::MalformedRecord {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

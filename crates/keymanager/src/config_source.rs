//! Source of the contract configuration.
//!
//! The contract publishes a monotonically increasing version and, per
//! role, the image hashes allowed to fetch keys. The key manager only
//! reads snapshots of it.

use keystead_core::{parse_hex32, ContractSection, Result as CoreResult};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::key::Role;

/// Point-in-time view of the contract configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractSnapshot {
    pub version: u32,
    pub proxy_hashes: HashSet<[u8; 32]>,
    pub worker_hashes: HashSet<[u8; 32]>,
    /// Unix time of the last successful sync, if any
    pub synced_at: Option<i64>,
}

impl ContractSnapshot {
    /// Build a snapshot from the `[contract]` config section.
    pub fn from_section(section: &ContractSection) -> CoreResult<Self> {
        let parse_all = |hashes: &[String]| -> CoreResult<HashSet<[u8; 32]>> {
            hashes
                .iter()
                .map(|hash| parse_hex32("contract hash", hash))
                .collect()
        };
        Ok(Self {
            version: section.version,
            proxy_hashes: parse_all(&section.proxy_hashes)?,
            worker_hashes: parse_all(&section.worker_hashes)?,
            synced_at: section.synced_at,
        })
    }

    pub fn has_proxy_hash(&self, hash: &[u8; 32]) -> bool {
        self.proxy_hashes.contains(hash)
    }

    pub fn has_worker_hash(&self, hash: &[u8; 32]) -> bool {
        self.worker_hashes.contains(hash)
    }

    pub fn has_hash(&self, role: Role, hash: &[u8; 32]) -> bool {
        match role {
            Role::Proxy => self.has_proxy_hash(hash),
            Role::Worker => self.has_worker_hash(hash),
        }
    }
}

/// Provider of contract snapshots.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> ContractSnapshot;
}

/// Shared config source handle.
pub type ConfigSourceRef = Arc<dyn ConfigSource>;

/// In-process config source, updated by whoever syncs the contract.
#[derive(Debug, Default)]
pub struct StaticConfigSource {
    current: RwLock<ContractSnapshot>,
}

impl StaticConfigSource {
    pub fn new(snapshot: ContractSnapshot) -> Self {
        Self {
            current: RwLock::new(snapshot),
        }
    }

    /// Replace the current snapshot.
    pub fn update(&self, snapshot: ContractSnapshot) {
        let mut current = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *current = snapshot;
    }
}

impl ConfigSource for StaticConfigSource {
    fn snapshot(&self) -> ContractSnapshot {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

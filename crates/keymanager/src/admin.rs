//! Administrative operations and the status report.
//!
//! Commands take the textual arguments an operator types and return a
//! textual result. Malformed input is reported in the result text; only
//! store failures are errors. Every mutating command flushes the store
//! before reporting success.

use keystead_store::{KvBackend, SqliteBackend};
use serde::Serialize;
use std::fmt;
use tracing::info;

use crate::config_source::ConfigSourceRef;
use crate::error::KeyManagerResult;
use crate::lifecycle::{with_manager_blocking, SharedManager};

/// Age below which the contract config counts as synced.
pub const SYNCED_MAX_AGE_SECS: i64 = 600;

/// Age below which the contract config counts as late.
pub const LATE_MAX_AGE_SECS: i64 = 3600;

/// Freshness of the contract configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncState {
    Synced,
    Late,
    OutOfSync,
}

impl SyncState {
    pub fn from_age(synced_at: Option<i64>, now: i64) -> Self {
        match synced_at.map(|at| now - at) {
            Some(age) if age < SYNCED_MAX_AGE_SECS => SyncState::Synced,
            Some(age) if age < LATE_MAX_AGE_SECS => SyncState::Late,
            _ => SyncState::OutOfSync,
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncState::Synced => f.write_str("synced"),
            SyncState::Late => f.write_str("late"),
            SyncState::OutOfSync => f.write_str("outOfSync"),
        }
    }
}

/// One key line in the status report. Never carries the private key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeyStatus {
    pub public_key: String,
    pub for_proxies: bool,
    pub for_workers: bool,
    pub valid_since_config_version: u32,
    pub valid_since: i64,
    pub valid_until: i64,
}

/// Snapshot of the key manager for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub now: i64,
    pub initialized: bool,
    pub check_hashes: bool,
    pub active_config_version: u32,
    pub source_config_version: u32,
    pub synced_at: Option<i64>,
    pub sync_state: SyncState,
    /// Records signed by this process
    pub records_signed: u64,
    /// Signature checks run by this process
    pub records_verified: u64,
    pub verification_failures: u64,
    pub keys: Vec<KeyStatus>,
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "key manager")?;
        writeln!(f, "  initialized: {}", self.initialized)?;
        writeln!(f, "  check hashes: {}", self.check_hashes)?;
        writeln!(
            f,
            "  config version: active {} / source {}",
            self.active_config_version, self.source_config_version
        )?;
        match self.synced_at {
            Some(at) => writeln!(f, "  contract: {} ({}s ago)", self.sync_state, self.now - at)?,
            None => writeln!(f, "  contract: {} (never synced)", self.sync_state)?,
        }
        writeln!(
            f,
            "  records: {} signed, {} verified, {} failed verification",
            self.records_signed, self.records_verified, self.verification_failures
        )?;
        writeln!(f, "  keys: {}", self.keys.len())?;
        for key in &self.keys {
            let roles = match (key.for_proxies, key.for_workers) {
                (true, true) => "proxy+worker",
                (true, false) => "proxy",
                (false, true) => "worker",
                (false, false) => "none",
            };
            writeln!(
                f,
                "    {} [{}] config v{} valid {}..{} ({}s left)",
                key.public_key,
                roles,
                key.valid_since_config_version,
                key.valid_since,
                key.valid_until,
                key.valid_until - self.now
            )?;
        }
        Ok(())
    }
}

/// Operator commands against the shared lifecycle manager.
pub struct AdminOps<B: KvBackend = SqliteBackend> {
    manager: SharedManager<B>,
    source: ConfigSourceRef,
    check_hashes: bool,
}

impl<B: KvBackend> Clone for AdminOps<B> {
    fn clone(&self) -> Self {
        Self {
            manager: self.manager.clone(),
            source: self.source.clone(),
            check_hashes: self.check_hashes,
        }
    }
}

impl<B: KvBackend + 'static> AdminOps<B> {
    pub fn new(manager: SharedManager<B>, source: ConfigSourceRef, check_hashes: bool) -> Self {
        Self {
            manager,
            source,
            check_hashes,
        }
    }

    /// Remove a key given its hex public key.
    pub async fn remove_key(&self, public_key_hex: &str) -> KeyManagerResult<String> {
        let mut public_key = [0u8; 32];
        if let Err(e) = hex::decode_to_slice(public_key_hex.trim(), &mut public_key) {
            return Ok(format!("cannot parse public key '{public_key_hex}': {e}"));
        }

        let removed = with_manager_blocking(&self.manager, move |manager| {
            let removed = manager.remove_key(&public_key)?;
            manager.flush()?;
            Ok(removed)
        })
        .await?;

        let text = if removed {
            info!(public_key = %hex::encode(public_key), "Key removed by operator");
            format!("removed key {}", hex::encode(public_key))
        } else {
            format!("no key {}", hex::encode(public_key))
        };
        Ok(text)
    }

    /// Generate a key for `"worker"`, `"proxy"` or `"proxyworker"`.
    pub async fn generate_key(&self, role: &str) -> KeyManagerResult<String> {
        let (for_proxies, for_workers) = match role.trim() {
            "worker" => (false, true),
            "proxy" => (true, false),
            "proxyworker" => (true, true),
            other => return Ok(format!("unknown key type '{other}'")),
        };

        let public_key = with_manager_blocking(&self.manager, move |manager| {
            let public_key = manager.generate_key(for_proxies, for_workers)?;
            manager.flush()?;
            Ok(public_key)
        })
        .await?;

        info!(public_key = %hex::encode(public_key), role = role.trim(), "Key generated by operator");
        Ok(format!("generated {} key {}", role.trim(), hex::encode(public_key)))
    }

    pub async fn status(&self) -> StatusReport {
        let manager = self.manager.lock().await;
        let snapshot = self.source.snapshot();
        let now = manager.now();
        let counts = manager.store().signing_counts();

        StatusReport {
            now,
            initialized: manager.is_initialized(),
            check_hashes: self.check_hashes,
            active_config_version: manager.active_config_version(),
            source_config_version: snapshot.version,
            synced_at: snapshot.synced_at,
            sync_state: SyncState::from_age(snapshot.synced_at, now),
            records_signed: counts.signed,
            records_verified: counts.verified,
            verification_failures: counts.verification_failures,
            keys: manager
                .keys()
                .iter()
                .map(|key| KeyStatus {
                    public_key: hex::encode(key.public_key()),
                    for_proxies: key.for_proxies,
                    for_workers: key.for_workers,
                    valid_since_config_version: key.valid_since_config_version,
                    valid_since: key.valid_since,
                    valid_until: key.valid_until,
                })
                .collect(),
        }
    }
}

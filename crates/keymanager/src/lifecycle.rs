//! Key lifecycle management.
//!
//! The [`KeyLifecycleManager`] owns the live key set and is the only writer
//! of the signed record store. Periodic [`reconcile`](KeyLifecycleManager::reconcile)
//! runs advance the active config version, sweep expired keys and make sure
//! every role has at least one live key.
//!
//! # Invariants
//!
//! - After a successful reconcile there is at least one unexpired proxy key
//!   and one unexpired worker key
//! - `valid_since_config_version <= active_config_version` for every key
//! - The active config version never decreases and never exceeds the
//!   source's version

use keystead_core::{ClockRef, IntegrityViolation};
use keystead_store::{
    ConfigRecord, KvBackend, RecordKind, SignedRecordStore, SqliteBackend, StoredKey, CONFIG_KEY,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config_source::{ConfigSourceRef, ContractSnapshot};
use crate::error::{KeyManagerError, KeyManagerResult};
use crate::key::{KeyRecord, Role};

/// Lifecycle manager shared between the maintenance task, admin operations
/// and query handlers.
pub type SharedManager<B = SqliteBackend> = Arc<tokio::sync::Mutex<KeyLifecycleManager<B>>>;

/// What one reconcile run changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// `(previous, new)` when the active config version advanced
    pub config_advanced: Option<(u32, u32)>,
    /// Public keys of the swept keys
    pub expired: Vec<[u8; 32]>,
    /// Public keys of the generated keys
    pub generated: Vec<[u8; 32]>,
}

/// Owner of the live key set.
pub struct KeyLifecycleManager<B: KvBackend = SqliteBackend> {
    store: SignedRecordStore<B>,
    keys: Vec<KeyRecord>,
    active_config_version: u32,
    /// Expired records found at load, erased by the next reconcile
    stale_records: Vec<String>,
    source: ConfigSourceRef,
    clock: ClockRef,
    initialized: bool,
}

impl<B: KvBackend> KeyLifecycleManager<B> {
    /// Load the key set from `store`.
    ///
    /// Every record is verified. Expired keys are dropped silently; a key
    /// whose seed does not match its storage key, or that claims a config
    /// version newer than the active one, is an integrity violation.
    pub fn open(
        store: SignedRecordStore<B>,
        source: ConfigSourceRef,
        clock: ClockRef,
    ) -> KeyManagerResult<Self> {
        let now = clock.now();
        let source_version = source.snapshot().version;
        let records = store.scan()?;

        let mut active_config_version = 0;
        for record in records.iter().filter(|r| r.kind == RecordKind::Config) {
            let config: ConfigRecord = keystead_store::records::decode(&record.key, &record.payload)?;
            active_config_version = config.root_contract_version();
        }
        if active_config_version > source_version {
            return Err(IntegrityViolation::ConfigVersionAhead {
                stored: active_config_version,
                source_version,
            }
            .into());
        }

        let mut keys = Vec::new();
        let mut stale_records = Vec::new();
        for record in &records {
            let RecordKind::Key(public_key) = &record.kind else {
                continue;
            };
            let stored: StoredKey = keystead_store::records::decode(&record.key, &record.payload)?;
            let key = KeyRecord::from_stored(public_key, &stored)?;
            if key.valid_since_config_version > active_config_version {
                return Err(IntegrityViolation::KeyVersionAhead {
                    key: record.key.clone(),
                    key_version: key.valid_since_config_version,
                    active: active_config_version,
                }
                .into());
            }
            if key.is_expired(now) {
                debug!(key_id = %key.key_id(), "Dropping expired key at load");
                stale_records.push(record.key.clone());
                continue;
            }
            keys.push(key);
        }

        info!(
            keys = keys.len(),
            expired = stale_records.len(),
            active_config_version,
            "Key store loaded"
        );

        Ok(Self {
            store,
            keys,
            active_config_version,
            stale_records,
            source,
            clock,
            initialized: false,
        })
    }

    /// Mint and persist a new key for the given roles.
    pub fn generate_key(&mut self, for_proxies: bool, for_workers: bool) -> KeyManagerResult<[u8; 32]> {
        let key = KeyRecord::generate(
            for_proxies,
            for_workers,
            self.clock.now(),
            self.active_config_version,
        );
        persist_key(&mut self.store, &key)?;
        let public_key = *key.public_key();
        self.keys.push(key);
        Ok(public_key)
    }

    /// Remove the key with `public_key` from memory and store.
    ///
    /// Returns whether a key was removed; an unknown key is a no-op.
    pub fn remove_key(&mut self, public_key: &[u8; 32]) -> KeyManagerResult<bool> {
        let Some(index) = self.keys.iter().position(|k| k.public_key() == public_key) else {
            return Ok(false);
        };
        self.store.erase(&self.keys[index].storage_key())?;
        let key = self.keys.remove(index);
        info!(key_id = %key.key_id(), "Key removed");
        Ok(true)
    }

    /// One maintenance pass.
    ///
    /// Runs in a single store transaction followed by a flush. If the
    /// transaction fails it is rolled back and the in-memory state is
    /// untouched. Once it commits, memory follows the store even when the
    /// flush then fails; the manager only counts as initialized after a
    /// successful flush.
    pub fn reconcile(&mut self) -> KeyManagerResult<ReconcileReport> {
        let now = self.clock.now();
        let snapshot = self.source.snapshot();
        let mut keys = self.keys.clone();
        let mut active = self.active_config_version;
        let stale_records = self.stale_records.clone();

        let report = self.store.transaction(|store| {
            reconcile_in_transaction(store, &mut keys, &mut active, &stale_records, &snapshot, now)
        })?;

        self.keys = keys;
        self.active_config_version = active;
        self.stale_records.clear();

        if let Err(e) = self.store.flush() {
            warn!(error = %e, "Flush after reconcile failed");
            return Err(e.into());
        }
        if !self.initialized {
            info!("Key manager initialized");
        }
        self.initialized = true;

        if report != ReconcileReport::default() {
            info!(
                expired = report.expired.len(),
                generated = report.generated.len(),
                active_config_version = active,
                "Reconcile applied changes"
            );
        }
        Ok(report)
    }

    /// Live keys serving `role`, with their expiry.
    pub fn keys_for_role(&self, role: Role) -> Vec<&KeyRecord> {
        let now = self.clock.now();
        self.keys
            .iter()
            .filter(|k| k.serves(role) && !k.is_expired(now))
            .collect()
    }

    pub fn keys(&self) -> &[KeyRecord] {
        &self.keys
    }

    pub fn active_config_version(&self) -> u32 {
        self.active_config_version
    }

    /// Whether at least one reconcile has succeeded.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn source(&self) -> &ConfigSourceRef {
        &self.source
    }

    pub fn flush(&mut self) -> KeyManagerResult<()> {
        self.store.flush()?;
        Ok(())
    }

    pub fn store(&self) -> &SignedRecordStore<B> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SignedRecordStore<B> {
        &mut self.store
    }

    /// Wrap into a [`SharedManager`].
    pub fn into_shared(self) -> SharedManager<B> {
        Arc::new(tokio::sync::Mutex::new(self))
    }
}

/// Run `f` on the blocking pool with exclusive access to the manager.
///
/// Store writes, commits and flushes are synchronous SQLite calls and must
/// not run on an async worker thread.
pub async fn with_manager_blocking<B, T, F>(manager: &SharedManager<B>, f: F) -> KeyManagerResult<T>
where
    B: KvBackend + 'static,
    T: Send + 'static,
    F: FnOnce(&mut KeyLifecycleManager<B>) -> KeyManagerResult<T> + Send + 'static,
{
    let mut guard = Arc::clone(manager).lock_owned().await;
    tokio::task::spawn_blocking(move || f(&mut guard))
        .await
        .map_err(|e| KeyManagerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

fn persist_key<B: KvBackend>(store: &mut SignedRecordStore<B>, key: &KeyRecord) -> KeyManagerResult<()> {
    store.set_record(&key.storage_key(), &key.to_stored())?;
    info!(
        key_id = %key.key_id(),
        for_proxies = key.for_proxies,
        for_workers = key.for_workers,
        valid_until = key.valid_until,
        "Key generated"
    );
    Ok(())
}

fn reconcile_in_transaction<B: KvBackend>(
    store: &mut SignedRecordStore<B>,
    keys: &mut Vec<KeyRecord>,
    active: &mut u32,
    stale_records: &[String],
    snapshot: &ContractSnapshot,
    now: i64,
) -> KeyManagerResult<ReconcileReport> {
    let mut report = ReconcileReport::default();

    if snapshot.version > *active {
        store.set_record(
            CONFIG_KEY,
            &ConfigRecord::ConfigV1 {
                root_contract_version: snapshot.version,
            },
        )?;
        info!(from = *active, to = snapshot.version, "Config version advanced");
        report.config_advanced = Some((*active, snapshot.version));
        *active = snapshot.version;
    } else if snapshot.version < *active {
        warn!(
            source = snapshot.version,
            active = *active,
            "Config source is behind the active version"
        );
    }

    for storage_key in stale_records {
        store.erase(storage_key)?;
    }

    let mut kept = Vec::with_capacity(keys.len());
    for key in keys.drain(..) {
        if key.is_expired(now) {
            store.erase(&key.storage_key())?;
            info!(key_id = %key.key_id(), valid_until = key.valid_until, "Key expired");
            report.expired.push(*key.public_key());
        } else {
            kept.push(key);
        }
    }
    *keys = kept;

    let workers = keys.iter().filter(|k| k.for_workers).count();
    let proxies = keys.iter().filter(|k| k.for_proxies).count();

    if workers == 0 {
        let key = KeyRecord::generate(false, true, now, *active);
        persist_key(store, &key)?;
        report.generated.push(*key.public_key());
        keys.push(key);
    }
    if proxies == 0 {
        let key = KeyRecord::generate(true, false, now, *active);
        persist_key(store, &key)?;
        report.generated.push(*key.public_key());
        keys.push(key);
    }

    Ok(report)
}

impl<B: KvBackend> std::fmt::Debug for KeyLifecycleManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLifecycleManager")
            .field("keys", &self.keys)
            .field("active_config_version", &self.active_config_version)
            .field("initialized", &self.initialized)
            .finish_non_exhaustive()
    }
}

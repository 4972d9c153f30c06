//! Signed record store.
//!
//! Wraps a [`KvBackend`] so that every value written is `payload || sig`,
//! where `sig` is the machine key's Ed25519 signature over `payload`, and
//! every value read is verified before its payload is handed out. A host
//! that edits the database can delete records but cannot forge or alter
//! them without the next read failing with an [`IntegrityViolation`].

use keystead_core::IntegrityViolation;
use keystead_crypto::{RecordSigner, SigningCounts, SIGNATURE_LEN};
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use tracing::{debug, error, warn};

use crate::backend::{KvBackend, SqliteBackend};
use crate::error::{StoreError, StoreResult};
use crate::records::{self, RecordKind};

/// A verified record produced by [`SignedRecordStore::scan`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    pub key: String,
    pub kind: RecordKind,
    pub payload: Vec<u8>,
}

/// Key-value store that signs every record with the machine key.
pub struct SignedRecordStore<B: KvBackend = SqliteBackend> {
    backend: B,
    signer: RecordSigner,
}

impl SignedRecordStore<SqliteBackend> {
    /// Open (or create) the SQLite-backed store at `path`.
    pub fn open(path: impl AsRef<Path>, machine_seed: &[u8]) -> StoreResult<Self> {
        let signer = RecordSigner::from_seed(machine_seed)?;
        let backend = SqliteBackend::open(path)?;
        Ok(Self::new(backend, signer))
    }
}

impl<B: KvBackend> SignedRecordStore<B> {
    pub fn new(backend: B, signer: RecordSigner) -> Self {
        Self { backend, signer }
    }

    /// Public key records are verified against.
    pub fn public_key(&self) -> [u8; 32] {
        self.signer.public_key()
    }

    /// Records signed and verified through this store so far.
    pub fn signing_counts(&self) -> SigningCounts {
        self.signer.metrics().snapshot()
    }

    /// Fetch and verify the payload stored under `key`.
    pub fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.backend.get(key)? {
            Some(value) => Ok(Some(self.open_value(key, value)?)),
            None => Ok(None),
        }
    }

    /// Sign `payload` and store it under `key`.
    pub fn set(&mut self, key: &str, payload: &[u8]) -> StoreResult<()> {
        let sealed = self.signer.seal(payload);
        self.backend.set(key, &sealed)?;
        debug!(key, len = payload.len(), "Record written");
        Ok(())
    }

    pub fn erase(&mut self, key: &str) -> StoreResult<()> {
        self.backend.erase(key)?;
        debug!(key, "Record erased");
        Ok(())
    }

    pub fn flush(&mut self) -> StoreResult<()> {
        self.backend.flush()
    }

    pub fn begin_transaction(&mut self) -> StoreResult<()> {
        self.backend.begin_transaction()
    }

    pub fn commit_transaction(&mut self) -> StoreResult<()> {
        self.backend.commit_transaction()
    }

    pub fn rollback_transaction(&mut self) -> StoreResult<()> {
        self.backend.rollback_transaction()
    }

    pub fn in_transaction(&self) -> bool {
        self.backend.in_transaction()
    }

    /// Run `f` inside a transaction: commit on `Ok`, roll back on `Err`.
    pub fn transaction<T, E, F>(&mut self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<StoreError>,
    {
        self.begin_transaction()?;
        match f(self) {
            Ok(value) => {
                self.commit_transaction()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = self.rollback_transaction() {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    /// Fetch, verify and decode a JSON record.
    pub fn get_record<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            Some(payload) => Ok(Some(records::decode(key, &payload)?)),
            None => Ok(None),
        }
    }

    /// Encode a JSON record and store it signed.
    pub fn set_record<T: Serialize>(&mut self, key: &str, record: &T) -> StoreResult<()> {
        let payload = records::encode(record)?;
        self.set(key, &payload)
    }

    /// Verify every persisted record and classify it by type.
    ///
    /// Fails on the first record that is truncated, badly signed, or of an
    /// unknown type.
    pub fn scan(&self) -> StoreResult<Vec<ScannedRecord>> {
        let rows = self.backend.snapshot()?;
        let mut scanned = Vec::with_capacity(rows.len());
        for (key, value) in rows {
            let kind = RecordKind::parse(&key).map_err(|violation| {
                error!(key = %key, "Unknown record type in store");
                violation
            })?;
            let payload = self.open_value(&key, value)?;
            scanned.push(ScannedRecord { key, kind, payload });
        }
        debug!(count = scanned.len(), "Store scan complete");
        Ok(scanned)
    }

    /// Underlying backend, bypassing signatures.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Mutable backend access, bypassing signatures.
    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    fn open_value(&self, key: &str, mut value: Vec<u8>) -> Result<Vec<u8>, IntegrityViolation> {
        if value.len() < SIGNATURE_LEN {
            error!(key, len = value.len(), "Truncated record");
            return Err(IntegrityViolation::TruncatedRecord {
                key: key.to_string(),
                len: value.len(),
            });
        }
        let signature = value.split_off(value.len() - SIGNATURE_LEN);
        if self.signer.verify(&value, &signature).is_err() {
            error!(key, "Record signature mismatch");
            return Err(IntegrityViolation::BadSignature {
                key: key.to_string(),
            });
        }
        Ok(value)
    }
}

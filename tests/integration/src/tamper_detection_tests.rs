//! Tampered persisted state is detected at startup
//!
//! Every scenario writes a valid key set, edits the database behind the
//! manager's back and asserts that loading fails with a fatal error.

use crate::test_utils::{contract, open_manager, temp_db_path, MACHINE_SEED, START};
use keystead_core::{IntegrityViolation, ManualClock};
use keystead_keymanager::{KeyLifecycleManager, KeyManagerError, StaticConfigSource};
use keystead_store::{SignedRecordStore, StoreError};
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn seeded_db() -> (PathBuf, Vec<String>) {
    let db_path = temp_db_path();
    let clock = ManualClock::new(START);
    let mut manager = open_manager(&db_path, Arc::new(StaticConfigSource::new(contract(1))), &clock);
    manager.reconcile().unwrap();
    let keys = manager.keys().iter().map(|k| k.storage_key()).collect();
    (db_path, keys)
}

fn reload(db_path: &Path, version: u32) -> Result<KeyLifecycleManager, KeyManagerError> {
    let store = SignedRecordStore::open(db_path, &MACHINE_SEED).unwrap();
    KeyLifecycleManager::open(
        store,
        Arc::new(StaticConfigSource::new(contract(version))),
        Arc::new(ManualClock::new(START + 60)),
    )
}

fn raw_value(db_path: &Path, key: &str) -> Vec<u8> {
    let conn = Connection::open(db_path).unwrap();
    conn.query_row("SELECT value FROM records WHERE key = ?1", params![key], |row| {
        row.get(0)
    })
    .unwrap()
}

fn write_raw(db_path: &Path, key: &str, value: &[u8]) {
    let conn = Connection::open(db_path).unwrap();
    conn.execute(
        "INSERT OR REPLACE INTO records (key, value) VALUES (?1, ?2)",
        params![key, value],
    )
    .unwrap();
}

fn assert_integrity(result: Result<KeyLifecycleManager, KeyManagerError>) -> IntegrityViolation {
    let err = match result {
        Ok(_) => panic!("tampered store was loaded"),
        Err(err) => err,
    };
    assert!(err.is_fatal(), "expected fatal error, got {err}");
    match err {
        KeyManagerError::Integrity(violation)
        | KeyManagerError::Store(StoreError::Integrity(violation)) => violation,
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn test_reload_of_untouched_store_succeeds() {
    let (db_path, keys) = seeded_db();
    let manager = reload(&db_path, 1).unwrap();
    assert_eq!(manager.keys().len(), keys.len());
    std::fs::remove_file(db_path).ok();
}

#[test]
fn test_flipped_payload_bit_is_fatal() {
    let (db_path, keys) = seeded_db();
    let mut value = raw_value(&db_path, &keys[0]);
    value[5] ^= 0x01;
    write_raw(&db_path, &keys[0], &value);

    let violation = assert_integrity(reload(&db_path, 1));
    assert_eq!(violation, IntegrityViolation::BadSignature { key: keys[0].clone() });
    std::fs::remove_file(db_path).ok();
}

#[test]
fn test_truncated_record_is_fatal() {
    let (db_path, keys) = seeded_db();
    write_raw(&db_path, &keys[1], &[0u8; 10]);

    let violation = assert_integrity(reload(&db_path, 1));
    assert!(matches!(violation, IntegrityViolation::TruncatedRecord { len: 10, .. }));
    std::fs::remove_file(db_path).ok();
}

#[test]
fn test_record_moved_to_another_key_is_fatal() {
    let (db_path, keys) = seeded_db();
    let value = raw_value(&db_path, &keys[0]);
    let forged = format!("key_{}", hex::encode([0x77u8; 32]));
    write_raw(&db_path, &forged, &value);

    assert_integrity(reload(&db_path, 1));
    std::fs::remove_file(db_path).ok();
}

#[test]
fn test_signed_record_of_unknown_type_is_fatal() {
    let (db_path, _) = seeded_db();
    {
        let mut store = SignedRecordStore::open(&db_path, &MACHINE_SEED).unwrap();
        store.set("lease_01", b"{}").unwrap();
        store.flush().unwrap();
    }

    let violation = assert_integrity(reload(&db_path, 1));
    assert!(matches!(violation, IntegrityViolation::UnknownRecordType { .. }));
    std::fs::remove_file(db_path).ok();
}

#[test]
fn test_source_behind_persisted_config_is_fatal() {
    let (db_path, _) = seeded_db();
    {
        let clock = ManualClock::new(START);
        let mut manager = open_manager(&db_path, Arc::new(StaticConfigSource::new(contract(5))), &clock);
        manager.reconcile().unwrap();
    }

    let violation = assert_integrity(reload(&db_path, 4));
    assert_eq!(
        violation,
        IntegrityViolation::ConfigVersionAhead { stored: 5, source_version: 4 }
    );
    std::fs::remove_file(db_path).ok();
}

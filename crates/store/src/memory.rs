//! In-memory backend.

use std::collections::BTreeMap;

use crate::backend::KvBackend;
use crate::error::{StoreError, StoreResult};

/// `BTreeMap` backed store with snapshot-based rollback.
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    data: BTreeMap<String, Vec<u8>>,
    /// State to restore on rollback, present while a transaction is open
    rollback: Option<BTreeMap<String, Vec<u8>>>,
    flushes: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful flushes.
    pub fn flush_count(&self) -> u64 {
        self.flushes
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl KvBackend for MemoryBackend {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.data.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn erase(&mut self, key: &str) -> StoreResult<()> {
        self.data.remove(key);
        Ok(())
    }

    fn begin_transaction(&mut self) -> StoreResult<()> {
        if self.rollback.is_some() {
            return Err(StoreError::Transaction(
                "transaction already open".to_string(),
            ));
        }
        self.rollback = Some(self.data.clone());
        Ok(())
    }

    fn commit_transaction(&mut self) -> StoreResult<()> {
        self.rollback
            .take()
            .map(|_| ())
            .ok_or_else(|| StoreError::Transaction("no open transaction".to_string()))
    }

    fn rollback_transaction(&mut self) -> StoreResult<()> {
        let previous = self
            .rollback
            .take()
            .ok_or_else(|| StoreError::Transaction("no open transaction".to_string()))?;
        self.data = previous;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.rollback.is_some()
    }

    fn flush(&mut self) -> StoreResult<()> {
        if self.in_transaction() {
            return Err(StoreError::Transaction(
                "cannot flush inside a transaction".to_string(),
            ));
        }
        self.flushes += 1;
        Ok(())
    }

    fn snapshot(&self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        Ok(self
            .data
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }
}

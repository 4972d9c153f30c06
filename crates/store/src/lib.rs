//! Integrity-protected persistent key-value store.
//!
//! Every record is stored as `payload || Ed25519 signature` under the
//! machine key and verified on every read.

pub mod backend;
pub mod error;
pub mod memory;
pub mod records;
pub mod signed;

pub use backend::{KvBackend, SqliteBackend};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryBackend;
pub use records::{ConfigRecord, RecordKind, StoredKey, CONFIG_KEY};
pub use signed::{ScannedRecord, SignedRecordStore};

//! Transactional key-value backends.
//!
//! The signed store only needs a small, byte-oriented interface: point reads
//! and writes, erase, explicit transactions, a durability flush, and a full
//! scan for startup. [`SqliteBackend`] is the production implementation;
//! [`MemoryBackend`](crate::MemoryBackend) backs unit tests.

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Byte-oriented transactional key-value store.
///
/// Implementations are used from a single writer; concurrent transactions
/// from several processes against one store are not supported.
pub trait KvBackend: Send {
    /// Fetch the raw value stored under `key`.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Insert or overwrite `key`.
    fn set(&mut self, key: &str, value: &[u8]) -> StoreResult<()>;

    /// Remove `key`. Erasing a missing key is not an error.
    fn erase(&mut self, key: &str) -> StoreResult<()>;

    fn begin_transaction(&mut self) -> StoreResult<()>;

    fn commit_transaction(&mut self) -> StoreResult<()>;

    fn rollback_transaction(&mut self) -> StoreResult<()>;

    fn in_transaction(&self) -> bool;

    /// Force committed data to durable storage.
    fn flush(&mut self) -> StoreResult<()>;

    /// Every `(key, raw value)` pair, ordered by key.
    fn snapshot(&self) -> StoreResult<Vec<(String, Vec<u8>)>>;
}

/// SQLite-backed key-value store in WAL mode.
pub struct SqliteBackend {
    /// SQLite database connection
    conn: Connection,
    /// Database file
    path: PathBuf,
}

impl SqliteBackend {
    /// Create or open a store at the specified path
    ///
    /// # Arguments
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    /// * `Ok(SqliteBackend)` - Successfully opened store
    /// * `Err(StoreError)` - Failed to open or initialize database
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();

        info!(path = %path.display(), "Opening record store");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        Self::init_schema(&conn)?;

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Initialize database schema
    fn init_schema(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY NOT NULL,
                value BLOB NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Get the database path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KvBackend for SqliteBackend {
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM records WHERE key = ?1",
                params![key],
                |row| row.get::<_, Vec<u8>>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&mut self, key: &str, value: &[u8]) -> StoreResult<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO records (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn erase(&mut self, key: &str) -> StoreResult<()> {
        self.conn
            .execute("DELETE FROM records WHERE key = ?1", params![key])?;
        Ok(())
    }

    fn begin_transaction(&mut self) -> StoreResult<()> {
        if self.in_transaction() {
            return Err(StoreError::Transaction(
                "transaction already open".to_string(),
            ));
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit_transaction(&mut self) -> StoreResult<()> {
        if !self.in_transaction() {
            return Err(StoreError::Transaction("no open transaction".to_string()));
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback_transaction(&mut self) -> StoreResult<()> {
        if !self.in_transaction() {
            return Err(StoreError::Transaction("no open transaction".to_string()));
        }
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn flush(&mut self) -> StoreResult<()> {
        if self.in_transaction() {
            return Err(StoreError::Transaction(
                "cannot flush inside a transaction".to_string(),
            ));
        }
        self.conn
            .query_row("PRAGMA wal_checkpoint(FULL)", [], |_| Ok(()))?;
        debug!(path = %self.path.display(), "Record store flushed");
        Ok(())
    }

    fn snapshot(&self) -> StoreResult<Vec<(String, Vec<u8>)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM records ORDER BY key ASC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> PathBuf {
        std::env::temp_dir().join(format!("keystead_store_{}.db", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_set_get_erase() {
        let db_path = temp_db();
        let mut backend = SqliteBackend::open(&db_path).unwrap();

        assert!(backend.get("config").unwrap().is_none());
        backend.set("config", b"v1").unwrap();
        backend.set("config", b"v2").unwrap();
        assert_eq!(backend.get("config").unwrap(), Some(b"v2".to_vec()));

        backend.erase("config").unwrap();
        backend.erase("config").unwrap();
        assert!(backend.get("config").unwrap().is_none());

        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_rollback_discards_writes() {
        let db_path = temp_db();
        let mut backend = SqliteBackend::open(&db_path).unwrap();

        backend.begin_transaction().unwrap();
        assert!(backend.in_transaction());
        backend.set("key_aa", b"x").unwrap();
        backend.rollback_transaction().unwrap();

        assert!(!backend.in_transaction());
        assert!(backend.get("key_aa").unwrap().is_none());

        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_nested_transaction_rejected() {
        let db_path = temp_db();
        let mut backend = SqliteBackend::open(&db_path).unwrap();

        backend.begin_transaction().unwrap();
        assert!(matches!(
            backend.begin_transaction(),
            Err(StoreError::Transaction(_))
        ));
        assert!(matches!(backend.flush(), Err(StoreError::Transaction(_))));
        backend.commit_transaction().unwrap();
        backend.flush().unwrap();

        std::fs::remove_file(db_path).ok();
    }

    #[test]
    fn test_snapshot_survives_reopen() {
        let db_path = temp_db();
        {
            let mut backend = SqliteBackend::open(&db_path).unwrap();
            backend.begin_transaction().unwrap();
            backend.set("key_bb", b"2").unwrap();
            backend.set("config", b"1").unwrap();
            backend.commit_transaction().unwrap();
            backend.flush().unwrap();
        }

        let backend = SqliteBackend::open(&db_path).unwrap();
        let rows = backend.snapshot().unwrap();
        assert_eq!(
            rows,
            vec![
                ("config".to_string(), b"1".to_vec()),
                ("key_bb".to_string(), b"2".to_vec()),
            ]
        );

        std::fs::remove_file(db_path).ok();
    }
}

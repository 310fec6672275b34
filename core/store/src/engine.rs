//! Ordered key-value engine over an embedded SQLite database.
//!
//! All records live in one `WITHOUT ROWID` table keyed by BLOB. SQLite
//! compares BLOBs with `memcmp`, so `ORDER BY key` is byte-lexicographic
//! and a prefix scan seeks to the prefix and stops at the first key outside
//! it.
//!
//! The connection runs in exclusive locking mode and takes the write lock
//! while opening, so a second open against the same directory fails
//! immediately instead of waiting or interleaving writes.

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

use plexaccess_common::{Error, Result};

/// Database file name inside the store directory.
pub const DB_FILENAME: &str = "store.db";

const SCHEMA: &str = r#"
    BEGIN EXCLUSIVE;
    CREATE TABLE IF NOT EXISTS kv (
        key BLOB PRIMARY KEY,
        value BLOB NOT NULL
    ) WITHOUT ROWID;
    COMMIT;
"#;

/// Map a SQLite error onto the engine error variant.
pub(crate) fn engine_err(e: rusqlite::Error) -> Error {
    Error::Engine(e.to_string())
}

fn is_busy(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == ErrorCode::DatabaseBusy || f.code == ErrorCode::DatabaseLocked
    )
}

/// Handle to the embedded database.
///
/// The connection sits behind a mutex; `close` takes it out, after which
/// every transaction fails with `Error::Closed`.
pub struct Engine {
    conn: Mutex<Option<Connection>>,
    path: PathBuf,
}

impl Engine {
    /// Open the database in `dir`.
    ///
    /// # Preconditions
    /// - `dir` must exist
    ///
    /// # Errors
    /// - `Error::Engine` if the database cannot be opened, or another
    ///   handle already holds it
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(DB_FILENAME);

        let conn = Connection::open(&path).map_err(engine_err)?;
        conn.busy_timeout(Duration::ZERO).map_err(engine_err)?;
        conn.pragma_update_and_check(None, "locking_mode", "EXCLUSIVE", |row| {
            row.get::<_, String>(0)
        })
        .map_err(engine_err)?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(engine_err)?;

        conn.execute_batch(SCHEMA).map_err(|e| {
            if is_busy(&e) {
                Error::Engine(format!(
                    "{} is locked by another open store",
                    path.display()
                ))
            } else {
                engine_err(e)
            }
        })?;

        debug!(path = %path.display(), "Engine opened");

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path,
        })
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether `close` has already run.
    pub fn is_closed(&self) -> bool {
        self.lock().map(|guard| guard.is_none()).unwrap_or(true)
    }

    /// Close the database.
    ///
    /// # Returns
    /// - `Ok(true)` if this call closed the connection
    /// - `Ok(false)` if it was already closed
    ///
    /// # Errors
    /// - `Error::Engine` if SQLite reports a failure while closing; the
    ///   handle is closed regardless
    pub fn close(&self) -> Result<bool> {
        let conn = self.lock()?.take();
        match conn {
            None => Ok(false),
            Some(conn) => {
                conn.close().map_err(|(_, e)| engine_err(e))?;
                Ok(true)
            }
        }
    }

    /// Run `f` inside a read transaction.
    pub fn view<T>(&self, f: impl FnOnce(&ReadTxn<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(Error::Closed)?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .map_err(engine_err)?;
        let out = f(&ReadTxn { conn: &tx })?;
        tx.commit().map_err(engine_err)?;

        Ok(out)
    }

    /// Run `f` inside a write transaction.
    ///
    /// Commits only if `f` returns `Ok`; any error rolls back every write
    /// `f` made.
    pub fn update<T>(&self, f: impl FnOnce(&WriteTxn<'_>) -> Result<T>) -> Result<T> {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(Error::Closed)?;

        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(engine_err)?;
        let out = f(&WriteTxn {
            read: ReadTxn { conn: &tx },
        })?;
        tx.commit().map_err(engine_err)?;

        Ok(out)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>> {
        self.conn
            .lock()
            .map_err(|_| Error::Engine("engine lock poisoned".to_string()))
    }
}

/// Read access inside a transaction.
pub struct ReadTxn<'a> {
    conn: &'a Connection,
}

impl ReadTxn<'_> {
    /// Point read. `None` if the key is absent.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()
            .map_err(engine_err)
    }

    /// Visit every entry whose key starts with `prefix`, in key order.
    ///
    /// The scan starts at the first key `>= prefix` and ends at the first
    /// key that does not start with `prefix`. An error from `visit` stops
    /// the scan and is returned.
    pub fn scan_prefix<F>(&self, prefix: &[u8], mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM kv WHERE key >= ?1 ORDER BY key")
            .map_err(engine_err)?;
        let mut rows = stmt.query(params![prefix]).map_err(engine_err)?;

        while let Some(row) = rows.next().map_err(engine_err)? {
            let key: Vec<u8> = row.get(0).map_err(engine_err)?;
            if !key.starts_with(prefix) {
                break;
            }
            let value: Vec<u8> = row.get(1).map_err(engine_err)?;
            visit(&key, &value)?;
        }

        Ok(())
    }
}

/// Read-write access inside a transaction.
pub struct WriteTxn<'a> {
    read: ReadTxn<'a>,
}

impl<'a> std::ops::Deref for WriteTxn<'a> {
    type Target = ReadTxn<'a>;

    fn deref(&self) -> &Self::Target {
        &self.read
    }
}

impl WriteTxn<'_> {
    /// Insert or overwrite `key`.
    pub fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.read
            .conn
            .execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(engine_err)?;
        Ok(())
    }

    /// Whether the transaction is still open. SQLite aborts the whole
    /// transaction on some statement errors; after that this is `false`.
    pub fn is_active(&self) -> bool {
        !self.read.conn.is_autocommit()
    }

    /// Remove `key`. Removing an absent key is not an error.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.read
            .conn
            .execute("DELETE FROM kv WHERE key = ?1", params![key])
            .map_err(engine_err)?;
        Ok(())
    }
}

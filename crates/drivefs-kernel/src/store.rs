//! Durable state backed by SQLite.
//!
//! A single database file holds:
//! - the user drive's items (`user_items`)
//! - named key-value stores (`kv`), e.g. the mount registry
//!
//! The file lives at `data_dir/state.db` (see [`crate::config::VfsConfig`]).

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OpenFlags};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{FsError, FsResult};

/// Schema SQL embedded from schema/state.sql.
const SCHEMA_SQL: &str = include_str!("../schema/state.sql");

/// Shared handle to the state database.
///
/// Cloning shares the connection. Calls are short and synchronous; the lock
/// is never held across an `.await`.
#[derive(Debug, Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create a state database at the given path.
    ///
    /// Creates parent directories and initializes schema if needed.
    pub fn open(path: impl AsRef<Path>) -> FsResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        tracing::debug!(path = %path.display(), "opened state database");
        Self::with_schema(conn)
    }

    /// Create an in-memory database (for tests or throwaway instances).
    pub fn in_memory() -> FsResult<Self> {
        Self::with_schema(Connection::open_in_memory()?)
    }

    fn with_schema(conn: Connection) -> FsResult<Self> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> FsResult<T> {
        let conn = self.conn.lock().map_err(|_| FsError::LockPoisoned)?;
        Ok(f(&conn)?)
    }

    /// Open the key-value store called `name`.
    pub fn open_store(&self, name: impl Into<String>) -> KvStore {
        KvStore {
            db: self.clone(),
            name: name.into(),
        }
    }
}

/// A named key-value store with JSON values.
#[derive(Debug, Clone)]
pub struct KvStore {
    db: Database,
    name: String,
}

impl KvStore {
    /// Every entry, in the order keys were first written.
    pub fn all<V: DeserializeOwned>(&self) -> FsResult<Vec<(String, V)>> {
        let rows = self.db.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT key, value FROM kv WHERE store = ?1 ORDER BY rowid")?;
            let rows = stmt
                .query_map(params![self.name], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;

        rows.into_iter()
            .map(|(key, json)| -> FsResult<(String, V)> {
                Ok((key, serde_json::from_str(&json)?))
            })
            .collect()
    }

    /// Insert or replace. A replaced key keeps its position in [`KvStore::all`].
    pub fn set<V: Serialize>(&self, key: &str, value: &V) -> FsResult<()> {
        let json = serde_json::to_string(value)?;
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (store, key, value) VALUES (?1, ?2, ?3)
                 ON CONFLICT (store, key) DO UPDATE SET value = excluded.value",
                params![self.name, key, json],
            )
        })?;
        Ok(())
    }

    /// Delete a key. Returns whether it existed.
    pub fn del(&self, key: &str) -> FsResult<bool> {
        let removed = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM kv WHERE store = ?1 AND key = ?2",
                params![self.name, key],
            )
        })?;
        Ok(removed > 0)
    }
}

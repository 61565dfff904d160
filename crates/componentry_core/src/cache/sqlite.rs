//! SQLite-backed cache codec.
//!
//! # Responsibility
//! - Store cache documents in the `cache_documents` table keyed by path.
//!
//! # Invariants
//! - Connections come from `db::open_db*`, so migrations are applied first.
//! - Writes are upserts; a path holds at most one document.
//!
//! # See also
//! - db/migrations/0001_cache_documents.sql

use crate::cache::codec::CacheCodec;
use crate::db::{open_db, open_db_in_memory, StoreResult};
use crate::error::CacheError;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// File name of the SQLite store inside a cache directory.
pub const SQLITE_STORE_FILE: &str = "cache.sqlite3";

pub struct SqliteCacheCodec {
    conn: Mutex<Connection>,
}

impl SqliteCacheCodec {
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::from_connection(open_db(path)?))
    }

    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self::from_connection(open_db_in_memory()?))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl CacheCodec for SqliteCacheCodec {
    fn decode(&self, path: &Path) -> Result<Value, CacheError> {
        let body: Option<String> = self
            .conn
            .lock()
            .query_row(
                "SELECT body FROM cache_documents WHERE path = ?1;",
                params![document_key(path)],
                |row| row.get(0),
            )
            .optional()
            .map_err(|err| CacheError::Io(err.to_string()))?;

        let body = body.ok_or(CacheError::Miss)?;
        serde_json::from_str(&body).map_err(|err| CacheError::Decode(err.to_string()))
    }

    fn encode(&self, path: &Path, value: &Value) -> Result<(), CacheError> {
        let body = serde_json::to_string(value).map_err(|err| CacheError::Decode(err.to_string()))?;
        self.conn
            .lock()
            .execute(
                "INSERT INTO cache_documents (path, body, updated_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(path) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at;",
                params![document_key(path), body, now_epoch_ms()],
            )
            .map_err(|err| CacheError::Io(err.to_string()))?;
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.conn
            .lock()
            .query_row(
                "SELECT 1 FROM cache_documents WHERE path = ?1;",
                params![document_key(path)],
                |_| Ok(()),
            )
            .optional()
            .map(|found| found.is_some())
            .unwrap_or(false)
    }
}

fn document_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}

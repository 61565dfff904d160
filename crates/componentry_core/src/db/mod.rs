//! SQLite bootstrap for the manifest cache store.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the SQLite cache codec.
//! - Apply schema migrations in deterministic order.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Cache documents are never read or written before migrations succeed.
//! - A store written by a newer build is refused, never downgraded.
//!
//! # See also
//! - cache/sqlite.rs

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure while opening or migrating a cache store.
///
/// Once a store is open, document reads and writes fail as `CacheError`
/// instead, so the registry can treat them as cache misses.
#[derive(Debug)]
pub enum StoreError {
    /// Opening the file or configuring the connection failed.
    Bootstrap(rusqlite::Error),
    /// One migration script failed; the store keeps its previous version.
    Migration {
        version: u32,
        source: rusqlite::Error,
    },
    /// The store was migrated by a newer build.
    NewerSchema { found: u32, supported: u32 },
}

impl StoreError {
    /// Stable code used in `error_code=` log fields.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Bootstrap(_) => "store_bootstrap_failed",
            Self::Migration { .. } => "store_migration_failed",
            Self::NewerSchema { .. } => "store_schema_newer",
        }
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bootstrap(err) => write!(f, "cache store bootstrap failed: {err}"),
            Self::Migration { version, source } => {
                write!(f, "cache store migration {version} failed: {source}")
            }
            Self::NewerSchema { found, supported } => write!(
                f,
                "cache store schema version {found} is newer than supported {supported}"
            ),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Bootstrap(err) | Self::Migration { source: err, .. } => Some(err),
            Self::NewerSchema { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Bootstrap(value)
    }
}

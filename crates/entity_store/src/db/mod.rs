//! SQLite connection bootstrap.
//!
//! # Responsibility
//! - Open and configure SQLite connections used by a `StorageContext`.
//! - Hold the connection-level configuration (`StoreConfig`).
//!
//! # Invariants
//! - Returned connections have the configured `foreign_keys` pragma applied.
//! - Schema creation and migrations are owned by the caller, not this crate.

use serde::Deserialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

mod open;

pub use open::{open_db, open_db_in_memory};

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

/// Connection-level settings applied when a database is opened.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// How long a writer waits on a locked database before failing.
    pub busy_timeout_ms: u64,
    /// Enables `PRAGMA foreign_keys`.
    pub foreign_keys: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            foreign_keys: true,
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

//! Error taxonomy shared by the context, query, and service layers.
//!
//! # Invariants
//! - Provider failures keep the original `rusqlite::Error` as their source.
//! - The service layer returns these values unchanged; it never re-wraps.

use crate::db::DbError;
use crate::model::EntityId;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Coarse classification of a `StoreError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A lookup found no row.
    NotFound,
    /// The stored concurrency token differs from the one supplied.
    ConcurrencyConflict,
    /// Any failure raised by the storage engine itself.
    ProviderFailure,
    /// The caller supplied an argument this layer refuses to send to SQL.
    InvalidArgument,
}

#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    NotFound {
        table: &'static str,
        id: EntityId,
    },
    ConcurrencyConflict {
        table: &'static str,
        id: EntityId,
    },
    UnknownColumn {
        table: &'static str,
        column: String,
    },
    InvalidPage {
        page: u32,
        page_size: u32,
    },
    MissingRequiredTable(&'static str),
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    InvalidData(String),
    /// A blocking storage task did not run to completion.
    Runtime(String),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Self::UnknownColumn { .. } | Self::InvalidPage { .. } => ErrorKind::InvalidArgument,
            Self::Db(_)
            | Self::MissingRequiredTable(_)
            | Self::MissingRequiredColumn { .. }
            | Self::InvalidData(_)
            | Self::Runtime(_) => ErrorKind::ProviderFailure,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_concurrency_conflict(&self) -> bool {
        self.kind() == ErrorKind::ConcurrencyConflict
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound { table, id } => write!(f, "{table} row not found: {id}"),
            Self::ConcurrencyConflict { table, id } => write!(
                f,
                "{table} row {id} was modified by another writer since it was read"
            ),
            Self::UnknownColumn { table, column } => {
                write!(f, "column `{column}` is not mapped on table `{table}`")
            }
            Self::InvalidPage { page, page_size } => write!(
                f,
                "invalid page request: page={page} page_size={page_size}; page must be >= 1"
            ),
            Self::MissingRequiredTable(table) => write!(f, "required table missing: {table}"),
            Self::MissingRequiredColumn { table, column } => {
                write!(f, "required column missing: {table}.{column}")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::Runtime(message) => write!(f, "storage task failed: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::Runtime(value.to_string())
    }
}

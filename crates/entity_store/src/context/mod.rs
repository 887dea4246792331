//! Storage context: one connection plus its change tracker.
//!
//! # Responsibility
//! - Own the SQLite connection used by one unit of work.
//! - Stage writes per entity type and flush them on save.
//! - Provide scoped transactions and the blocking bridge used by async
//!   callers.
//!
//! # Invariants
//! - All access to the connection goes through one mutex; a transaction
//!   scope holds it until it completes or rolls back.
//! - `save_changes` is atomic: all pending changes commit or none do.
//! - Code running inside a scope must not call back into the same context.

use crate::db::{open_db, open_db_in_memory, StoreConfig};
use crate::error::{StoreError, StoreResult};
use crate::model::{Entity, ID_COLUMN, TOKEN_COLUMN};
use log::{error, info};
use parking_lot::Mutex;
use rusqlite::Connection;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

mod scope;
mod set;
mod tracker;

pub use scope::TransactionScope;
pub use set::EntitySet;
pub use tracker::{
    ChangeKind, ChangeTicket, QueryTrackingBehavior, SaveReport, SavedChange, TrackingOptions,
};

pub(crate) use tracker::ChangeTracker;

pub(crate) struct ContextState {
    pub(crate) conn: Connection,
    pub(crate) tracker: ChangeTracker,
}

/// Shared handle to a connection and its pending changes.
///
/// Clones refer to the same connection and tracker.
#[derive(Clone)]
pub struct StorageContext {
    inner: Arc<Mutex<ContextState>>,
}

impl StorageContext {
    /// Wraps an already configured connection with default tracking options.
    pub fn new(conn: Connection) -> Self {
        Self::with_options(conn, TrackingOptions::default())
    }

    pub fn with_options(conn: Connection, options: TrackingOptions) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ContextState {
                conn,
                tracker: ChangeTracker::new(options),
            })),
        }
    }

    pub fn open(path: impl AsRef<Path>, config: &StoreConfig) -> StoreResult<Self> {
        Ok(Self::new(open_db(path, config)?))
    }

    pub fn open_in_memory(config: &StoreConfig) -> StoreResult<Self> {
        Ok(Self::new(open_db_in_memory(config)?))
    }

    pub fn tracking_options(&self) -> TrackingOptions {
        self.inner.lock().tracker.options()
    }

    /// Replaces tracking options; switching to no-tracking clears snapshots.
    pub fn configure(&self, options: TrackingOptions) {
        self.inner.lock().tracker.set_options(options);
    }

    /// Collection accessor for `T`.
    pub fn set<T: Entity>(&self) -> EntitySet<T> {
        EntitySet::new(self.clone())
    }

    /// Number of staged changes waiting for a save.
    pub fn pending_changes(&self) -> usize {
        self.inner.lock().tracker.pending_len()
    }

    /// Number of rows held in the identity map.
    pub fn tracked_entities(&self) -> usize {
        self.inner.lock().tracker.tracked_len()
    }

    /// Runs raw SQL, e.g. schema setup owned by the caller.
    pub fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.inner.lock().conn.execute_batch(sql)?;
        Ok(())
    }

    /// Checks that `T`'s table and every mapped column exist.
    pub fn verify_mapping<T: Entity>(&self) -> StoreResult<()> {
        let state = self.inner.lock();
        if !table_exists(&state.conn, T::TABLE)? {
            return Err(StoreError::MissingRequiredTable(T::TABLE));
        }
        let required = [ID_COLUMN, TOKEN_COLUMN];
        for column in required.iter().chain(T::COLUMNS.iter()) {
            if !table_has_column(&state.conn, T::TABLE, column)? {
                return Err(StoreError::MissingRequiredColumn {
                    table: T::TABLE,
                    column: *column,
                });
            }
        }
        Ok(())
    }

    /// Runs `body` inside a transaction scope.
    ///
    /// The scope commits when `body` returns `Ok`; an `Err` (or a panic)
    /// rolls back and discards changes staged in it. Changes staged before
    /// the scope began stay pending even if its save failed.
    pub fn transaction<R>(
        &self,
        body: impl FnOnce(&mut TransactionScope<'_>) -> StoreResult<R>,
    ) -> StoreResult<R> {
        let mut state = self.inner.lock();
        let mut scope = TransactionScope::begin(&mut *state)?;
        let output = body(&mut scope)?;
        scope.complete()?;
        Ok(output)
    }

    /// Flushes every pending change in one transaction.
    ///
    /// Returns the number of rows written. On failure nothing is written
    /// and the pending changes are discarded.
    pub fn save_changes(&self) -> StoreResult<usize> {
        let started_at = Instant::now();
        let result = self.transaction(|scope| {
            scope.save_changes().map_err(|err| {
                scope.discard_pending();
                err
            })
        });
        match result {
            Ok(report) => {
                info!(
                    "event=save_changes module=context status=ok affected={} duration_ms={}",
                    report.affected,
                    started_at.elapsed().as_millis()
                );
                Ok(report.affected)
            }
            Err(err) => {
                error!(
                    "event=save_changes module=context status=error duration_ms={} error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    pub async fn save_changes_async(&self) -> StoreResult<usize> {
        let context = self.clone();
        run_blocking(move || context.save_changes()).await
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        let mut state = self.inner.lock();
        f(&mut state)
    }
}

/// Runs a storage call on tokio's blocking pool.
///
/// The returned future is the only suspension point of an async operation.
pub(crate) async fn run_blocking<R, F>(task: F) -> StoreResult<R>
where
    R: Send + 'static,
    F: FnOnce() -> StoreResult<R> + Send + 'static,
{
    tokio::task::spawn_blocking(task).await?
}

fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM pragma_table_info(?1)
            WHERE name = ?2
        );",
        [table, column],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

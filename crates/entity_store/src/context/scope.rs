//! Scoped transaction over a locked storage context.
//!
//! # Responsibility
//! - Stage and flush changes inside one SQLite transaction.
//! - Commit only through `complete`; every other exit rolls back.
//!
//! # Invariants
//! - Dropping an incomplete scope rolls the transaction back and discards
//!   changes staged through it; changes staged before it began stay queued.
//! - Identity-map snapshots taken in the scope apply only after commit.
//! - A scope holds the context lock for its whole lifetime.

use super::tracker::{ChangeTicket, ChangeTracker, SaveReport};
use super::ContextState;
use crate::error::{StoreError, StoreResult};
use crate::model::{Entity, EntityId};
use crate::query::QuerySpec;
use log::{debug, warn};
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// One unit of transactional work on a `StorageContext`.
///
/// Obtained from [`StorageContext::transaction`](super::StorageContext::transaction).
pub struct TransactionScope<'a> {
    tx: Option<Transaction<'a>>,
    tracker: &'a mut ChangeTracker,
    pending_at_begin: usize,
}

impl<'a> TransactionScope<'a> {
    pub(crate) fn begin(state: &'a mut ContextState) -> StoreResult<Self> {
        let ContextState { conn, tracker } = state;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        debug!("event=transaction module=context status=begin");
        Ok(Self {
            pending_at_begin: tracker.pending_len(),
            tx: Some(tx),
            tracker,
        })
    }

    /// Stages an insert of `item`.
    pub fn add<T: Entity>(&mut self, item: &T) -> ChangeTicket {
        self.tracker.stage_insert(item)
    }

    pub fn add_range<T: Entity>(&mut self, items: &[T]) -> Vec<ChangeTicket> {
        items
            .iter()
            .map(|item| self.tracker.stage_insert(item))
            .collect()
    }

    /// Stages an update of `item`, conditioned on its current token.
    pub fn update<T: Entity>(&mut self, item: &T) -> ChangeTicket {
        self.tracker.stage_update(item)
    }

    pub fn update_range<T: Entity>(&mut self, items: &[T]) -> Vec<ChangeTicket> {
        items
            .iter()
            .map(|item| self.tracker.stage_update(item))
            .collect()
    }

    /// Stages a physical removal of `item`.
    pub fn remove<T: Entity>(&mut self, item: &T) -> ChangeTicket {
        self.tracker.stage_remove(item)
    }

    /// Reads one row by identity inside this transaction.
    pub fn find<T: Entity>(&mut self, id: EntityId) -> StoreResult<Option<T>> {
        let spec = QuerySpec::by_id(id);
        let conn = self.connection()?;
        let found = spec.load_first::<T>(conn)?;
        if let Some(item) = found.as_ref() {
            self.tracker.track_uncommitted(item);
        }
        Ok(found)
    }

    /// Flushes all pending changes of the context inside this transaction.
    pub fn save_changes(&mut self) -> StoreResult<SaveReport> {
        let tx = self.tx.as_ref().ok_or_else(finished)?;
        let report = self.tracker.flush(tx)?;
        self.pending_at_begin = 0;
        Ok(report)
    }

    /// Drops every pending change of the context, including those staged
    /// before this scope began.
    pub(crate) fn discard_pending(&mut self) {
        self.tracker.truncate_pending(0);
        self.pending_at_begin = 0;
    }

    /// Commits the transaction.
    pub fn complete(mut self) -> StoreResult<()> {
        let tx = self.tx.take().ok_or_else(finished)?;
        if let Err(err) = tx.commit() {
            self.tracker.truncate_pending(self.pending_at_begin);
            self.tracker.discard_snapshots();
            return Err(err.into());
        }
        self.tracker.commit_snapshots();
        debug!("event=transaction module=context status=commit");
        Ok(())
    }

    fn connection(&self) -> StoreResult<&Connection> {
        self.tx.as_deref().ok_or_else(finished)
    }
}

impl Drop for TransactionScope<'_> {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            self.tracker.truncate_pending(self.pending_at_begin);
            self.tracker.discard_snapshots();
            if let Err(err) = tx.rollback() {
                warn!("event=transaction module=context status=error error_code=rollback_failed error={err}");
                return;
            }
            debug!("event=transaction module=context status=rollback");
        }
    }
}

fn finished() -> StoreError {
    StoreError::Runtime("transaction scope already finished".to_string())
}

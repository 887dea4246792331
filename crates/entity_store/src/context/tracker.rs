//! Pending-change queue, tracking options, and identity map.
//!
//! # Responsibility
//! - Stage inserts/updates/removes until a save flushes them.
//! - Execute staged changes in staging order and report their outcomes.
//! - Keep read snapshots when tracking queries are enabled.
//!
//! # Invariants
//! - Update and remove are conditioned on the original concurrency token.
//! - Every insert and update writes a freshly generated token.
//! - A failed flush puts every drained change back in the queue.
//! - Snapshots taken inside a transaction reach the identity map only once
//!   that transaction commits.

use crate::error::{StoreError, StoreResult};
use crate::model::entity::{new_token, quote_ident, Entity, EntityId, ID_COLUMN, TOKEN_COLUMN};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use serde::Deserialize;
use std::collections::HashMap;

/// Whether rows read through queries are recorded in the identity map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryTrackingBehavior {
    Tracking,
    NoTracking,
}

/// Change-tracking configuration held by a `StorageContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TrackingOptions {
    /// Skip staged updates whose values equal the tracked snapshot.
    pub auto_detect_changes: bool,
    pub query_tracking: QueryTrackingBehavior,
    /// Kept for providers that resolve relations; nothing here loads them.
    pub lazy_loading: bool,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            auto_detect_changes: true,
            query_tracking: QueryTrackingBehavior::Tracking,
            lazy_loading: true,
        }
    }
}

impl TrackingOptions {
    /// Settings for stateless, read-mostly callers.
    pub fn no_tracking() -> Self {
        Self {
            auto_detect_changes: false,
            query_tracking: QueryTrackingBehavior::NoTracking,
            lazy_loading: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Deleted,
    /// Staged update that matched the tracked snapshot; save skips it.
    Unchanged,
}

/// Handle for reading one staged change's outcome from a `SaveReport`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChangeTicket(u64);

/// Result of one flushed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedChange {
    pub ticket: ChangeTicket,
    pub kind: ChangeKind,
    pub id: EntityId,
    /// Token stored after the change; `None` for removed rows.
    pub timestamp: Option<Vec<u8>>,
}

/// Outcome of a save: affected row count and per-change results.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub affected: usize,
    pub changes: Vec<SavedChange>,
}

impl SaveReport {
    pub fn outcome(&self, ticket: ChangeTicket) -> Option<&SavedChange> {
        self.changes.iter().find(|change| change.ticket == ticket)
    }

    /// Writes the assigned identity and new token back onto `item`.
    pub fn apply<T: Entity>(&self, ticket: ChangeTicket, item: &mut T) {
        if let Some(change) = self.outcome(ticket) {
            if change.kind == ChangeKind::Deleted {
                return;
            }
            item.set_id(change.id);
            item.set_timestamp(change.timestamp.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    timestamp: Option<Vec<u8>>,
    values: Vec<Value>,
}

#[derive(Debug)]
struct StagedChange {
    ticket: ChangeTicket,
    kind: ChangeKind,
    table: &'static str,
    columns: &'static [&'static str],
    id: EntityId,
    timestamp: Option<Vec<u8>>,
    values: Vec<Value>,
}

#[derive(Debug)]
pub(crate) struct ChangeTracker {
    options: TrackingOptions,
    next_ticket: u64,
    pending: Vec<StagedChange>,
    snapshots: HashMap<SnapshotKey, Snapshot>,
    /// Snapshot refreshes (`None` = forget) waiting for a commit.
    uncommitted: Vec<(SnapshotKey, Option<Snapshot>)>,
}

type SnapshotKey = (&'static str, EntityId);

impl ChangeTracker {
    pub(crate) fn new(options: TrackingOptions) -> Self {
        Self {
            options,
            next_ticket: 0,
            pending: Vec::new(),
            snapshots: HashMap::new(),
            uncommitted: Vec::new(),
        }
    }

    pub(crate) fn options(&self) -> TrackingOptions {
        self.options
    }

    pub(crate) fn set_options(&mut self, options: TrackingOptions) {
        if options.query_tracking == QueryTrackingBehavior::NoTracking {
            self.snapshots.clear();
            self.uncommitted.clear();
        }
        self.options = options;
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn tracked_len(&self) -> usize {
        self.snapshots.len()
    }

    /// Drops changes staged after `len` pending entries existed.
    pub(crate) fn truncate_pending(&mut self, len: usize) {
        self.pending.truncate(len);
    }

    /// Records a read snapshot when query tracking is enabled.
    pub(crate) fn track<T: Entity>(&mut self, item: &T) {
        if self.is_tracking() {
            self.snapshots.insert((T::TABLE, item.id()), snapshot_of(item));
        }
    }

    /// Like `track`, for rows read inside a transaction that may roll back.
    pub(crate) fn track_uncommitted<T: Entity>(&mut self, item: &T) {
        if self.is_tracking() {
            self.uncommitted
                .push(((T::TABLE, item.id()), Some(snapshot_of(item))));
        }
    }

    /// Applies snapshot refreshes recorded since the transaction began.
    pub(crate) fn commit_snapshots(&mut self) {
        for (key, snapshot) in self.uncommitted.drain(..) {
            match snapshot {
                Some(snapshot) => {
                    self.snapshots.insert(key, snapshot);
                }
                None => {
                    self.snapshots.remove(&key);
                }
            }
        }
    }

    pub(crate) fn discard_snapshots(&mut self) {
        self.uncommitted.clear();
    }

    pub(crate) fn stage_insert<T: Entity>(&mut self, item: &T) -> ChangeTicket {
        self.stage(ChangeKind::Added, item)
    }

    pub(crate) fn stage_update<T: Entity>(&mut self, item: &T) -> ChangeTicket {
        let kind = if self.options.auto_detect_changes && self.matches_snapshot(item) {
            ChangeKind::Unchanged
        } else {
            ChangeKind::Modified
        };
        self.stage(kind, item)
    }

    pub(crate) fn stage_remove<T: Entity>(&mut self, item: &T) -> ChangeTicket {
        self.stage(ChangeKind::Deleted, item)
    }

    /// Executes every pending change on `conn` in staging order.
    ///
    /// The caller owns the surrounding transaction; on error it must roll
    /// back, since earlier changes of this flush were already executed.
    /// Snapshot refreshes wait for [`commit_snapshots`](Self::commit_snapshots).
    pub(crate) fn flush(&mut self, conn: &Connection) -> StoreResult<SaveReport> {
        let changes = std::mem::take(&mut self.pending);
        let outcome: StoreResult<Vec<SavedChange>> = changes
            .iter()
            .map(|change| execute_change(conn, change))
            .collect();
        let saved = match outcome {
            Ok(saved) => saved,
            Err(err) => {
                self.pending = changes;
                return Err(err);
            }
        };

        let mut report = SaveReport::default();
        for (change, saved) in changes.into_iter().zip(saved) {
            if saved.kind != ChangeKind::Unchanged {
                report.affected += 1;
            }
            if self.is_tracking() {
                let key = (change.table, saved.id);
                match saved.kind {
                    ChangeKind::Deleted => self.uncommitted.push((key, None)),
                    ChangeKind::Added | ChangeKind::Modified => self.uncommitted.push((
                        key,
                        Some(Snapshot {
                            timestamp: saved.timestamp.clone(),
                            values: change.values,
                        }),
                    )),
                    ChangeKind::Unchanged => {}
                }
            }
            report.changes.push(saved);
        }

        Ok(report)
    }

    fn is_tracking(&self) -> bool {
        self.options.query_tracking == QueryTrackingBehavior::Tracking
    }

    fn matches_snapshot<T: Entity>(&self, item: &T) -> bool {
        self.snapshots
            .get(&(T::TABLE, item.id()))
            .is_some_and(|snapshot| {
                snapshot.timestamp.as_deref() == item.timestamp()
                    && snapshot.values == item.values()
            })
    }

    fn stage<T: Entity>(&mut self, kind: ChangeKind, item: &T) -> ChangeTicket {
        let ticket = ChangeTicket(self.next_ticket);
        self.next_ticket += 1;
        self.pending.push(StagedChange {
            ticket,
            kind,
            table: T::TABLE,
            columns: T::COLUMNS,
            id: item.id(),
            timestamp: item.timestamp().map(<[u8]>::to_vec),
            values: item.values(),
        });
        ticket
    }
}

fn snapshot_of<T: Entity>(item: &T) -> Snapshot {
    Snapshot {
        timestamp: item.timestamp().map(<[u8]>::to_vec),
        values: item.values(),
    }
}

fn execute_change(conn: &Connection, change: &StagedChange) -> StoreResult<SavedChange> {
    match change.kind {
        ChangeKind::Added => execute_insert(conn, change),
        ChangeKind::Modified => execute_update(conn, change),
        ChangeKind::Deleted => execute_delete(conn, change),
        ChangeKind::Unchanged => Ok(SavedChange {
            ticket: change.ticket,
            kind: ChangeKind::Unchanged,
            id: change.id,
            timestamp: change.timestamp.clone(),
        }),
    }
}

fn execute_insert(conn: &Connection, change: &StagedChange) -> StoreResult<SavedChange> {
    let token = new_token();
    let mut columns = Vec::with_capacity(change.columns.len() + 2);
    let mut params = Vec::with_capacity(change.columns.len() + 2);

    // id 0 leaves assignment to the engine.
    if change.id != 0 {
        columns.push(quote_ident(ID_COLUMN));
        params.push(Value::Integer(change.id));
    }
    columns.extend(change.columns.iter().map(|column| quote_ident(column)));
    params.extend(change.values.iter().cloned());
    columns.push(quote_ident(TOKEN_COLUMN));
    params.push(Value::Blob(token.clone()));

    let placeholders = vec!["?"; columns.len()].join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders});",
        quote_ident(change.table),
        columns.join(", ")
    );
    conn.execute(&sql, params_from_iter(params))?;

    let id = if change.id != 0 {
        change.id
    } else {
        conn.last_insert_rowid()
    };

    Ok(SavedChange {
        ticket: change.ticket,
        kind: ChangeKind::Added,
        id,
        timestamp: Some(token),
    })
}

fn execute_update(conn: &Connection, change: &StagedChange) -> StoreResult<SavedChange> {
    let token = new_token();
    let mut assignments: Vec<String> = change
        .columns
        .iter()
        .map(|column| format!("{} = ?", quote_ident(column)))
        .collect();
    assignments.push(format!("{} = ?", quote_ident(TOKEN_COLUMN)));

    let mut params = change.values.clone();
    params.push(Value::Blob(token.clone()));
    params.push(Value::Integer(change.id));
    params.push(token_value(change.timestamp.as_deref()));

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ? AND {} IS ?;",
        quote_ident(change.table),
        assignments.join(", "),
        quote_ident(ID_COLUMN),
        quote_ident(TOKEN_COLUMN)
    );
    let changed = conn.execute(&sql, params_from_iter(params))?;
    if changed == 0 {
        return Err(missing_or_conflict(conn, change)?);
    }

    Ok(SavedChange {
        ticket: change.ticket,
        kind: ChangeKind::Modified,
        id: change.id,
        timestamp: Some(token),
    })
}

fn execute_delete(conn: &Connection, change: &StagedChange) -> StoreResult<SavedChange> {
    let sql = format!(
        "DELETE FROM {} WHERE {} = ? AND {} IS ?;",
        quote_ident(change.table),
        quote_ident(ID_COLUMN),
        quote_ident(TOKEN_COLUMN)
    );
    let params = [Value::Integer(change.id), token_value(change.timestamp.as_deref())];
    let changed = conn.execute(&sql, params_from_iter(params))?;
    if changed == 0 {
        return Err(missing_or_conflict(conn, change)?);
    }

    Ok(SavedChange {
        ticket: change.ticket,
        kind: ChangeKind::Deleted,
        id: change.id,
        timestamp: None,
    })
}

fn token_value(token: Option<&[u8]>) -> Value {
    match token {
        Some(bytes) => Value::Blob(bytes.to_vec()),
        None => Value::Null,
    }
}

/// Classifies a zero-row conditional write.
fn missing_or_conflict(conn: &Connection, change: &StagedChange) -> StoreResult<StoreError> {
    let sql = format!(
        "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?1);",
        quote_ident(change.table),
        quote_ident(ID_COLUMN)
    );
    let exists: i64 = conn.query_row(&sql, [change.id], |row| row.get(0))?;
    if exists == 1 {
        Ok(StoreError::ConcurrencyConflict {
            table: change.table,
            id: change.id,
        })
    } else {
        Ok(StoreError::NotFound {
            table: change.table,
            id: change.id,
        })
    }
}

//! Per-entity collection view over a storage context.

use super::tracker::ChangeTicket;
use super::StorageContext;
use crate::error::StoreResult;
use crate::model::{Entity, EntityId, ID_COLUMN};
use crate::query::{Filter, LazyQuery};
use std::marker::PhantomData;

/// Collection of `T` rows: stages writes on the context and opens queries.
///
/// Staged writes stay pending until the context saves.
pub struct EntitySet<T: Entity> {
    context: StorageContext,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for EntitySet<T> {
    fn clone(&self) -> Self {
        Self::new(self.context.clone())
    }
}

impl<T: Entity> EntitySet<T> {
    pub(crate) fn new(context: StorageContext) -> Self {
        Self {
            context,
            _entity: PhantomData,
        }
    }

    pub fn add(&self, item: &T) -> ChangeTicket {
        self.context.with_state(|state| state.tracker.stage_insert(item))
    }

    pub fn add_range(&self, items: &[T]) -> Vec<ChangeTicket> {
        self.context.with_state(|state| {
            items
                .iter()
                .map(|item| state.tracker.stage_insert(item))
                .collect()
        })
    }

    pub fn update(&self, item: &T) -> ChangeTicket {
        self.context.with_state(|state| state.tracker.stage_update(item))
    }

    pub fn update_range(&self, items: &[T]) -> Vec<ChangeTicket> {
        self.context.with_state(|state| {
            items
                .iter()
                .map(|item| state.tracker.stage_update(item))
                .collect()
        })
    }

    /// Stages a physical delete of `item`'s row.
    pub fn remove(&self, item: &T) -> ChangeTicket {
        self.context.with_state(|state| state.tracker.stage_remove(item))
    }

    /// Unfiltered lazy view of the table.
    pub fn query(&self) -> LazyQuery<T> {
        LazyQuery::new(self.context.clone())
    }

    pub fn filter(&self, filter: Filter) -> LazyQuery<T> {
        self.query().filter(filter)
    }

    pub fn find(&self, id: EntityId) -> StoreResult<Option<T>> {
        self.query().filter(Filter::eq(ID_COLUMN, id)).first()
    }

    pub fn to_list(&self) -> StoreResult<Vec<T>> {
        self.query().to_list()
    }
}

//! Generic data-access contract.
//!
//! # Responsibility
//! - Define the CRUD, query, and paging surface offered for every entity type.
//!
//! # Invariants
//! - Mutations other than `delete_where` run in their own transaction scope.
//! - Lookups return `Ok(None)` for missing rows; only `delete_by_id` turns
//!   absence into `StoreError::NotFound`.
//! - Errors reach the caller unchanged.

use crate::context::EntitySet;
use crate::error::StoreResult;
use crate::model::{Entity, EntityId};
use crate::query::{Filter, LazyQuery, LazyRows};
use async_trait::async_trait;

/// CRUD/query façade over one entity type.
#[async_trait]
pub trait Service<T: Entity>: Send + Sync {
    /// Inserts `item` and returns it with identity and token assigned.
    fn add(&self, item: T) -> StoreResult<T>;
    async fn add_async(&self, item: T) -> StoreResult<T>;

    /// Inserts all `items` atomically.
    fn add_range(&self, items: Vec<T>) -> StoreResult<Vec<T>>;
    async fn add_range_async(&self, items: Vec<T>) -> StoreResult<Vec<T>>;

    /// Writes `item` over its stored row, checked against its token.
    fn update(&self, item: T) -> StoreResult<T>;
    async fn update_async(&self, item: T) -> StoreResult<T>;

    fn update_range(&self, items: Vec<T>) -> StoreResult<Vec<T>>;
    async fn update_range_async(&self, items: Vec<T>) -> StoreResult<Vec<T>>;

    /// Saves `entity` as staged; soft-delete flags are the entity's concern.
    fn delete(&self, entity: &T) -> StoreResult<()>;
    async fn delete_async(&self, entity: T) -> StoreResult<()>;

    /// Looks up `id`, failing with `NotFound` before any write, then `delete`s it.
    fn delete_by_id(&self, id: EntityId) -> StoreResult<()>;
    async fn delete_by_id_async(&self, id: EntityId) -> StoreResult<()>;

    /// Stages an update of the first match; the next save flushes it.
    fn delete_where(&self, filter: &Filter) -> StoreResult<()>;

    fn get(&self, id: EntityId) -> StoreResult<Option<T>>;
    async fn get_async(&self, id: EntityId) -> StoreResult<Option<T>>;

    fn get_where(&self, filter: &Filter) -> StoreResult<Option<T>>;
    async fn get_where_async(&self, filter: Filter) -> StoreResult<Option<T>>;

    /// Whether at least one row matches.
    fn query(&self, filter: &Filter) -> StoreResult<bool>;
    async fn query_async(&self, filter: Filter) -> StoreResult<bool>;

    fn get_list(&self, filter: &Filter) -> StoreResult<Vec<T>>;
    async fn get_list_async(&self, filter: Filter) -> StoreResult<Vec<T>>;

    fn get_queryable(&self, filter: Filter) -> LazyQuery<T>;

    /// Page `page` (1-based) of `page_size` matching rows.
    ///
    /// `page == 0` is `InvalidPage`; `page_size == 0` yields an empty page.
    fn get_paged_queryable(
        &self,
        page: u32,
        page_size: u32,
        filter: Filter,
    ) -> StoreResult<LazyQuery<T>>;

    fn count(&self, filter: &Filter) -> StoreResult<u64>;
    async fn count_async(&self, filter: Filter) -> StoreResult<u64>;

    fn as_collection(&self) -> EntitySet<T>;
    fn as_queryable(&self) -> LazyQuery<T>;
    fn as_enumerable(&self) -> LazyRows<T>;

    /// Flushes changes staged outside the wrapped mutations.
    fn save_changes(&self) -> StoreResult<usize>;
    async fn save_changes_async(&self) -> StoreResult<usize>;
}

//! Reference `Service` implementation over a `StorageContext`.
//!
//! # Responsibility
//! - Configure the held context for stateless, no-tracking access.
//! - Wrap each mutation in a transaction scope: stage, save, then complete.
//! - Offer async variants that run the same work on the blocking pool.
//!
//! # Invariants
//! - A scope completes only after its save succeeded; failures roll back.
//! - `delete`, `delete_by_id`, and `delete_where` stage updates; rows are
//!   never physically removed through this type.
//! - Add failures are logged and returned unchanged.

use super::contract::Service;
use crate::context::{
    run_blocking, ChangeTicket, EntitySet, SaveReport, StorageContext, TrackingOptions,
};
use crate::error::{StoreError, StoreResult};
use crate::model::{Entity, EntityId, ID_COLUMN};
use crate::query::{Filter, LazyQuery, LazyRows};
use async_trait::async_trait;
use log::{debug, error};
use std::marker::PhantomData;

/// Stateless CRUD façade for `T`.
pub struct ServiceBase<T: Entity> {
    context: StorageContext,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for ServiceBase<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> ServiceBase<T> {
    /// Wraps `context` and switches it to no-tracking reads without change
    /// detection or lazy loading.
    pub fn new(context: StorageContext) -> Self {
        context.configure(TrackingOptions::no_tracking());
        debug!(
            "event=service_init module=service status=ok table={}",
            T::TABLE
        );
        Self {
            context,
            _entity: PhantomData,
        }
    }

    /// The context this service writes through.
    pub fn context(&self) -> &StorageContext {
        &self.context
    }

    fn insert_all(&self, mut items: Vec<T>) -> StoreResult<Vec<T>> {
        let count = items.len();
        let result = self.context.transaction(|scope| {
            let tickets = scope.add_range(&items);
            let report = scope.save_changes()?;
            Ok((tickets, report))
        });

        match result {
            Ok((tickets, report)) => {
                write_back(&report, &tickets, &mut items);
                Ok(items)
            }
            Err(err) => {
                error!(
                    "event=entity_add module=service status=error table={} count={} error_kind={:?} error={}",
                    T::TABLE,
                    count,
                    err.kind(),
                    err
                );
                Err(err)
            }
        }
    }

    fn update_all(&self, mut items: Vec<T>) -> StoreResult<Vec<T>> {
        let (tickets, report) = self.context.transaction(|scope| {
            let tickets = scope.update_range(&items);
            let report = scope.save_changes()?;
            Ok((tickets, report))
        })?;
        write_back(&report, &tickets, &mut items);
        Ok(items)
    }
}

fn write_back<T: Entity>(report: &SaveReport, tickets: &[ChangeTicket], items: &mut [T]) {
    for (ticket, item) in tickets.iter().zip(items.iter_mut()) {
        report.apply(*ticket, item);
    }
}

fn single<T>(mut items: Vec<T>) -> StoreResult<T> {
    items
        .pop()
        .ok_or_else(|| StoreError::InvalidData("single-item write returned no item".to_string()))
}

#[async_trait]
impl<T: Entity> Service<T> for ServiceBase<T> {
    fn add(&self, item: T) -> StoreResult<T> {
        single(self.insert_all(vec![item])?)
    }

    async fn add_async(&self, item: T) -> StoreResult<T> {
        let service = self.clone();
        run_blocking(move || service.add(item)).await
    }

    fn add_range(&self, items: Vec<T>) -> StoreResult<Vec<T>> {
        self.insert_all(items)
    }

    async fn add_range_async(&self, items: Vec<T>) -> StoreResult<Vec<T>> {
        let service = self.clone();
        run_blocking(move || service.add_range(items)).await
    }

    fn update(&self, item: T) -> StoreResult<T> {
        single(self.update_all(vec![item])?)
    }

    async fn update_async(&self, item: T) -> StoreResult<T> {
        let service = self.clone();
        run_blocking(move || service.update(item)).await
    }

    fn update_range(&self, items: Vec<T>) -> StoreResult<Vec<T>> {
        self.update_all(items)
    }

    async fn update_range_async(&self, items: Vec<T>) -> StoreResult<Vec<T>> {
        let service = self.clone();
        run_blocking(move || service.update_range(items)).await
    }

    fn delete(&self, entity: &T) -> StoreResult<()> {
        self.context.transaction(|scope| {
            scope.update(entity);
            scope.save_changes()?;
            Ok(())
        })
    }

    async fn delete_async(&self, entity: T) -> StoreResult<()> {
        let service = self.clone();
        run_blocking(move || service.delete(&entity)).await
    }

    fn delete_by_id(&self, id: EntityId) -> StoreResult<()> {
        let entity = self
            .get(id)?
            .ok_or(StoreError::NotFound { table: T::TABLE, id })?;
        self.delete(&entity)
    }

    async fn delete_by_id_async(&self, id: EntityId) -> StoreResult<()> {
        let service = self.clone();
        run_blocking(move || service.delete_by_id(id)).await
    }

    fn delete_where(&self, filter: &Filter) -> StoreResult<()> {
        if let Some(entity) = self.get_where(filter)? {
            self.as_collection().update(&entity);
        }
        Ok(())
    }

    fn get(&self, id: EntityId) -> StoreResult<Option<T>> {
        self.get_where(&Filter::eq(ID_COLUMN, id))
    }

    async fn get_async(&self, id: EntityId) -> StoreResult<Option<T>> {
        let service = self.clone();
        run_blocking(move || service.get(id)).await
    }

    fn get_where(&self, filter: &Filter) -> StoreResult<Option<T>> {
        self.get_queryable(filter.clone()).first()
    }

    async fn get_where_async(&self, filter: Filter) -> StoreResult<Option<T>> {
        let service = self.clone();
        run_blocking(move || service.get_where(&filter)).await
    }

    fn query(&self, filter: &Filter) -> StoreResult<bool> {
        self.get_queryable(filter.clone()).any()
    }

    async fn query_async(&self, filter: Filter) -> StoreResult<bool> {
        let service = self.clone();
        run_blocking(move || service.query(&filter)).await
    }

    fn get_list(&self, filter: &Filter) -> StoreResult<Vec<T>> {
        self.get_queryable(filter.clone()).to_list()
    }

    async fn get_list_async(&self, filter: Filter) -> StoreResult<Vec<T>> {
        let service = self.clone();
        run_blocking(move || service.get_list(&filter)).await
    }

    fn get_queryable(&self, filter: Filter) -> LazyQuery<T> {
        self.as_queryable().filter(filter)
    }

    fn get_paged_queryable(
        &self,
        page: u32,
        page_size: u32,
        filter: Filter,
    ) -> StoreResult<LazyQuery<T>> {
        if page == 0 {
            return Err(StoreError::InvalidPage { page, page_size });
        }
        let skip = u64::from(page - 1) * u64::from(page_size);
        Ok(self
            .get_queryable(filter)
            .skip(skip)
            .take(u64::from(page_size)))
    }

    fn count(&self, filter: &Filter) -> StoreResult<u64> {
        self.get_queryable(filter.clone()).count()
    }

    async fn count_async(&self, filter: Filter) -> StoreResult<u64> {
        let service = self.clone();
        run_blocking(move || service.count(&filter)).await
    }

    fn as_collection(&self) -> EntitySet<T> {
        self.context.set::<T>()
    }

    fn as_queryable(&self) -> LazyQuery<T> {
        self.as_collection().query()
    }

    fn as_enumerable(&self) -> LazyRows<T> {
        self.as_queryable().rows()
    }

    fn save_changes(&self) -> StoreResult<usize> {
        self.context.save_changes()
    }

    async fn save_changes_async(&self) -> StoreResult<usize> {
        self.context.save_changes_async().await
    }
}

//! Lazy, composable queries.
//!
//! # Responsibility
//! - Accumulate filter, ordering, skip, and take without touching storage.
//! - Translate the accumulated shape to one SQL statement on enumeration.
//!
//! # Invariants
//! - Filters always apply before skip/take, so paging counts matching rows.
//! - A filter or sort added after skip/take applies to the already paged
//!   rows (the paged statement becomes a subquery); it never changes which
//!   rows are on the page.
//! - Results are ordered by the requested columns, then by `id ASC`.
//! - Nothing is read until a terminal method (`to_list`, `first`, `count`,
//!   `any`, or iterating `LazyRows`) runs.

use super::filter::Filter;
use crate::context::{run_blocking, StorageContext};
use crate::error::{StoreError, StoreResult};
use crate::model::entity::{
    is_mapped_column, quote_ident, select_columns, Entity, EntityId, ID_COLUMN,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::marker::PhantomData;

const PAGED_ALIAS: &str = "paged";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Storage-independent description of one query.
///
/// `inner` holds an already paged query this one selects from.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct QuerySpec {
    inner: Option<Box<QuerySpec>>,
    filter: Filter,
    order: Vec<(String, SortDirection)>,
    skip: u64,
    take: Option<u64>,
}

impl QuerySpec {
    pub(crate) fn by_id(id: EntityId) -> Self {
        Self {
            filter: Filter::eq(ID_COLUMN, id),
            ..Self::default()
        }
    }

    fn push_filter(&mut self, filter: Filter) {
        self.wrap_if_paged();
        let current = std::mem::take(&mut self.filter);
        self.filter = current.and(filter);
    }

    fn push_order(&mut self, column: String, direction: SortDirection) {
        self.wrap_if_paged();
        self.order.push((column, direction));
    }

    fn is_paged(&self) -> bool {
        self.skip > 0 || self.take.is_some()
    }

    fn wrap_if_paged(&mut self) {
        if self.is_paged() {
            let paged = std::mem::take(self);
            self.inner = Some(Box::new(paged));
        }
    }

    fn push_skip(&mut self, count: u64) {
        self.skip = self.skip.saturating_add(count);
        if let Some(take) = self.take {
            self.take = Some(take.saturating_sub(count));
        }
    }

    fn push_take(&mut self, count: u64) {
        self.take = Some(self.take.map_or(count, |take| take.min(count)));
    }

    /// Builds `SELECT <projection> FROM <table> WHERE ... ORDER BY ... LIMIT ...`.
    fn to_sql<T: Entity>(&self, projection: &str) -> StoreResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let source = match &self.inner {
            Some(inner) => {
                let (inner_sql, inner_params) = inner.to_sql::<T>(&select_columns::<T>())?;
                params.extend(inner_params);
                format!("({inner_sql}) AS {}", quote_ident(PAGED_ALIAS))
            }
            None => quote_ident(T::TABLE),
        };

        let fragment = self.filter.compile::<T>()?;
        params.extend(fragment.params);
        let mut sql = format!("SELECT {projection} FROM {source} WHERE {}", fragment.sql);

        let mut order_terms = Vec::new();
        self.collect_order::<T>(&mut order_terms)?;
        order_terms.push(format!("{} ASC", quote_ident(ID_COLUMN)));
        sql.push_str(" ORDER BY ");
        sql.push_str(&order_terms.join(", "));

        if let Some(take) = self.take {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(clamp_i64(take)));
            if self.skip > 0 {
                sql.push_str(" OFFSET ?");
                params.push(Value::Integer(clamp_i64(self.skip)));
            }
        } else if self.skip > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            params.push(Value::Integer(clamp_i64(self.skip)));
        }

        Ok((sql, params))
    }

    /// Own sort keys first, then those of the paged query underneath.
    fn collect_order<T: Entity>(&self, terms: &mut Vec<String>) -> StoreResult<()> {
        for (column, direction) in &self.order {
            if !is_mapped_column::<T>(column) {
                return Err(StoreError::UnknownColumn {
                    table: T::TABLE,
                    column: column.clone(),
                });
            }
            terms.push(format!("{} {}", quote_ident(column), direction.as_sql()));
        }
        if let Some(inner) = &self.inner {
            inner.collect_order::<T>(terms)?;
        }
        Ok(())
    }

    pub(crate) fn load<T: Entity>(&self, conn: &Connection) -> StoreResult<Vec<T>> {
        let (sql, params) = self.to_sql::<T>(&select_columns::<T>())?;
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params))?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            items.push(T::from_row(row)?);
        }
        Ok(items)
    }

    pub(crate) fn load_first<T: Entity>(&self, conn: &Connection) -> StoreResult<Option<T>> {
        let mut first = self.clone();
        first.push_take(1);
        Ok(first.load::<T>(conn)?.into_iter().next())
    }

    pub(crate) fn count<T: Entity>(&self, conn: &Connection) -> StoreResult<u64> {
        let (inner, params) = self.to_sql::<T>(&quote_ident(ID_COLUMN))?;
        let sql = format!("SELECT COUNT(*) FROM ({inner});");
        let count: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    pub(crate) fn exists<T: Entity>(&self, conn: &Connection) -> StoreResult<bool> {
        let (inner, params) = self.to_sql::<T>("1")?;
        let sql = format!("SELECT EXISTS({inner});");
        let exists: i64 = conn.query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(exists == 1)
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Deferred query over `T` rows bound to a storage context.
///
/// Composition methods consume and return the query; terminal methods run
/// it. Rows read while the context tracks queries enter its identity map.
pub struct LazyQuery<T: Entity> {
    context: StorageContext,
    spec: QuerySpec,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> Clone for LazyQuery<T> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            spec: self.spec.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> std::fmt::Debug for LazyQuery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyQuery")
            .field("table", &T::TABLE)
            .field("spec", &self.spec)
            .finish()
    }
}

impl<T: Entity> LazyQuery<T> {
    pub(crate) fn new(context: StorageContext) -> Self {
        Self {
            context,
            spec: QuerySpec::default(),
            _entity: PhantomData,
        }
    }

    /// Narrows the query; combined with earlier filters by `AND`.
    ///
    /// After `skip`/`take` it narrows the page instead.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.spec.push_filter(filter);
        self
    }

    /// Adds a sort key after any existing ones.
    ///
    /// After `skip`/`take` the key re-sorts the page instead.
    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.spec.push_order(column.into(), direction);
        self
    }

    pub fn skip(mut self, count: u64) -> Self {
        self.spec.push_skip(count);
        self
    }

    pub fn take(mut self, count: u64) -> Self {
        self.spec.push_take(count);
        self
    }

    /// The SQL this query would run, with its bound parameters.
    pub fn to_sql(&self) -> StoreResult<(String, Vec<Value>)> {
        self.spec.to_sql::<T>(&select_columns::<T>())
    }

    pub fn to_list(&self) -> StoreResult<Vec<T>> {
        self.context.with_state(|state| {
            let items = self.spec.load::<T>(&state.conn)?;
            for item in &items {
                state.tracker.track(item);
            }
            Ok(items)
        })
    }

    pub fn first(&self) -> StoreResult<Option<T>> {
        self.clone().take(1).to_list().map(|items| items.into_iter().next())
    }

    pub fn count(&self) -> StoreResult<u64> {
        self.context
            .with_state(|state| self.spec.count::<T>(&state.conn))
    }

    pub fn any(&self) -> StoreResult<bool> {
        self.context
            .with_state(|state| self.spec.exists::<T>(&state.conn))
    }

    pub async fn to_list_async(&self) -> StoreResult<Vec<T>> {
        let query = self.clone();
        run_blocking(move || query.to_list()).await
    }

    pub async fn first_async(&self) -> StoreResult<Option<T>> {
        let query = self.clone();
        run_blocking(move || query.first()).await
    }

    pub async fn count_async(&self) -> StoreResult<u64> {
        let query = self.clone();
        run_blocking(move || query.count()).await
    }

    pub async fn any_async(&self) -> StoreResult<bool> {
        let query = self.clone();
        run_blocking(move || query.any()).await
    }

    /// Iterator that runs the query on its first `next` call.
    pub fn rows(self) -> LazyRows<T> {
        LazyRows {
            state: RowsState::Pending(self),
        }
    }
}

impl<T: Entity> IntoIterator for LazyQuery<T> {
    type Item = StoreResult<T>;
    type IntoIter = LazyRows<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows()
    }
}

enum RowsState<T: Entity> {
    Pending(LazyQuery<T>),
    Streaming(std::vec::IntoIter<T>),
    Done,
}

/// Lazily evaluated rows of a `LazyQuery`.
///
/// Yields a single `Err` and then stops if the query fails.
pub struct LazyRows<T: Entity> {
    state: RowsState<T>,
}

impl<T: Entity> Iterator for LazyRows<T> {
    type Item = StoreResult<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match std::mem::replace(&mut self.state, RowsState::Done) {
                RowsState::Pending(query) => match query.to_list() {
                    Ok(items) => self.state = RowsState::Streaming(items.into_iter()),
                    Err(err) => return Some(Err(err)),
                },
                RowsState::Streaming(mut items) => {
                    let next = items.next();
                    if next.is_some() {
                        self.state = RowsState::Streaming(items);
                    }
                    return next.map(Ok);
                }
                RowsState::Done => return None,
            }
        }
    }
}

//! Query building blocks: translatable filters and lazy queries.
//!
//! # Responsibility
//! - Express predicates that the engine evaluates, not the client.
//! - Defer execution until the caller enumerates results.

pub mod filter;
mod lazy;

pub use filter::{CompareOp, Filter, SqlFragment};
pub use lazy::{LazyQuery, LazyRows, SortDirection};

pub(crate) use lazy::QuerySpec;

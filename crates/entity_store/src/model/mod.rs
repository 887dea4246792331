//! Entity contracts shared by every storage type.
//!
//! # Responsibility
//! - Define the identity/token contract (`EntityBase`).
//! - Define the compile-time table mapping (`Entity`).
//!
//! # Invariants
//! - Every mapped table has `id INTEGER PRIMARY KEY` and `row_version BLOB`.

pub mod entity;

pub use entity::{
    column_value, is_mapped_column, read_identity, Entity, EntityBase, EntityId, ID_COLUMN,
    TOKEN_COLUMN,
};

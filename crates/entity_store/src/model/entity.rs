//! Entity identity contract and table mapping.
//!
//! # Responsibility
//! - Define what every stored record exposes: an integer identity and an
//!   opaque concurrency token.
//! - Describe, at compile time, which table and columns a record maps to.
//!
//! # Invariants
//! - `id == 0` means "not yet assigned"; inserts let the engine pick one.
//! - The token is opaque; only the storage context generates new values.
//! - `Entity::values()` returns exactly one value per `Entity::COLUMNS` entry,
//!   in the same order.

use rusqlite::types::Value;
use rusqlite::Row;
use uuid::Uuid;

/// Integer identity of a stored row.
pub type EntityId = i64;

/// Primary key column present on every mapped table.
pub const ID_COLUMN: &str = "id";
/// Concurrency token column present on every mapped table.
pub const TOKEN_COLUMN: &str = "row_version";

/// Identity and concurrency-token accessors shared by all entity types.
pub trait EntityBase {
    fn id(&self) -> EntityId;
    fn set_id(&mut self, id: EntityId);
    fn timestamp(&self) -> Option<&[u8]>;
    fn set_timestamp(&mut self, timestamp: Option<Vec<u8>>);
}

/// Compile-time mapping between an entity type and its table.
///
/// Implementors read `id` and `row_version` themselves in `from_row`;
/// [`read_identity`] covers the common case.
pub trait Entity: EntityBase + Sized + Send + 'static {
    /// Table holding rows of this type.
    const TABLE: &'static str;
    /// Non-key columns written on insert and update.
    const COLUMNS: &'static [&'static str];

    /// Column values in `COLUMNS` order.
    fn values(&self) -> Vec<Value>;

    /// Builds one entity from a row selected with all mapped columns.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Reads the identity and token columns from a mapped row.
pub fn read_identity(row: &Row<'_>) -> rusqlite::Result<(EntityId, Option<Vec<u8>>)> {
    Ok((row.get(ID_COLUMN)?, row.get(TOKEN_COLUMN)?))
}

/// Returns whether `column` is addressable on `T`'s table.
pub fn is_mapped_column<T: Entity>(column: &str) -> bool {
    column == ID_COLUMN || column == TOKEN_COLUMN || T::COLUMNS.contains(&column)
}

/// Resolves a mapped column of `entity` to its current value.
pub fn column_value<T: Entity>(entity: &T, column: &str) -> Option<Value> {
    if column == ID_COLUMN {
        return Some(Value::Integer(entity.id()));
    }
    if column == TOKEN_COLUMN {
        return Some(match entity.timestamp() {
            Some(token) => Value::Blob(token.to_vec()),
            None => Value::Null,
        });
    }
    let position = T::COLUMNS.iter().position(|name| *name == column)?;
    entity.values().into_iter().nth(position)
}

pub(crate) fn new_token() -> Vec<u8> {
    Uuid::new_v4().as_bytes().to_vec()
}

pub(crate) fn select_columns<T: Entity>() -> String {
    let mut columns = vec![quote_ident(ID_COLUMN), quote_ident(TOKEN_COLUMN)];
    columns.extend(T::COLUMNS.iter().map(|column| quote_ident(column)));
    columns.join(", ")
}

pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

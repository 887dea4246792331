#![allow(dead_code)]

use entity_store::{Entity, EntityBase, EntityId, StorageContext, StoreConfig};
use rusqlite::types::Value;
use rusqlite::Row;

pub const WIDGET_SCHEMA: &str = "
CREATE TABLE widgets (
    id INTEGER PRIMARY KEY,
    row_version BLOB,
    name TEXT NOT NULL UNIQUE,
    quantity INTEGER NOT NULL CHECK (quantity >= 0),
    is_deleted INTEGER NOT NULL DEFAULT 0
);
";

#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    pub id: EntityId,
    pub row_version: Option<Vec<u8>>,
    pub name: String,
    pub quantity: i64,
    pub is_deleted: bool,
}

impl Widget {
    pub fn new(name: &str, quantity: i64) -> Self {
        Self {
            id: 0,
            row_version: None,
            name: name.to_string(),
            quantity,
            is_deleted: false,
        }
    }
}

impl EntityBase for Widget {
    fn id(&self) -> EntityId {
        self.id
    }

    fn set_id(&mut self, id: EntityId) {
        self.id = id;
    }

    fn timestamp(&self) -> Option<&[u8]> {
        self.row_version.as_deref()
    }

    fn set_timestamp(&mut self, timestamp: Option<Vec<u8>>) {
        self.row_version = timestamp;
    }
}

impl Entity for Widget {
    const TABLE: &'static str = "widgets";
    const COLUMNS: &'static [&'static str] = &["name", "quantity", "is_deleted"];

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.name.clone()),
            Value::Integer(self.quantity),
            Value::Integer(i64::from(self.is_deleted)),
        ]
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let (id, row_version) = entity_store::model::read_identity(row)?;
        Ok(Self {
            id,
            row_version,
            name: row.get("name")?,
            quantity: row.get("quantity")?,
            is_deleted: row.get::<_, i64>("is_deleted")? != 0,
        })
    }
}

/// In-memory context with the widget table created.
pub fn open_context() -> StorageContext {
    let context = StorageContext::open_in_memory(&StoreConfig::default()).unwrap();
    context.execute_batch(WIDGET_SCHEMA).unwrap();
    context
}

/// Raw row count, bypassing every filter.
pub fn stored_rows(context: &StorageContext) -> u64 {
    context.set::<Widget>().query().count().unwrap()
}

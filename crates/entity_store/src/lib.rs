//! Generic data access over SQLite.
//! `Service<T>` is the contract callers program against; `ServiceBase<T>`
//! implements it on top of a `StorageContext`.

pub mod context;
pub mod db;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod service;

pub use context::{
    ChangeKind, ChangeTicket, EntitySet, QueryTrackingBehavior, SaveReport, SavedChange,
    StorageContext, TrackingOptions, TransactionScope,
};
pub use db::{open_db, open_db_in_memory, DbError, DbResult, StoreConfig};
pub use error::{ErrorKind, StoreError, StoreResult};
pub use logging::{default_log_level, init_logging, logging_status, LoggingConfig};
pub use model::{Entity, EntityBase, EntityId, ID_COLUMN, TOKEN_COLUMN};
pub use query::{CompareOp, Filter, LazyQuery, LazyRows, SortDirection};
pub use service::{Service, ServiceBase};

/// Returns the crate version.
pub fn store_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

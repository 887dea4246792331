//! Generic entity services.
//!
//! # Responsibility
//! - Define the data-access contract callers program against.
//! - Provide the transactional reference implementation.

pub mod contract;
pub mod service_base;

pub use contract::Service;
pub use service_base::ServiceBase;

//! High-level docmap API.
//!
//! Binds the document engine of `docmap-document` to a storage
//! collaborator:
//!
//! - [`Database`] -- blocking collaborator; every call returns when done
//! - [`AsyncDatabase`] -- suspending collaborator; every remote call is awaited
//! - [`QuerySet`] / [`AsyncQuerySet`] -- schema-scoped reads sharing one
//!   reference cache
//! - [`BulkWriter`] / [`AsyncBulkWriter`] -- batched inserts, saves and
//!   removes with partial-failure reporting
//! - [`OdmConfig`] -- tunables, loadable from TOML

pub mod bulk;
pub mod config;
pub mod database;
pub mod error;
pub mod query;
mod session;

// Re-export primary types at crate root for ergonomic imports.
pub use bulk::{AsyncBulkWriter, BulkWriter};
pub use config::OdmConfig;
pub use database::{AsyncDatabase, Database};
pub use error::{SdkError, SdkResult};
pub use query::{AsyncQuerySet, QuerySet};

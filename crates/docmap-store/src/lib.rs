//! Storage collaborator contract for docmap.
//!
//! The document layer never talks to a database directly. It consumes the
//! operations defined here, in either of two execution models:
//!
//! - [`Collaborator`] -- blocking calls
//! - [`AsyncCollaborator`] -- every remote operation is a suspension point
//!
//! # Vocabulary
//!
//! - [`Criteria`] -- equality / membership / existence conditions on dotted paths
//! - [`Projection`] -- which fields a read returns
//! - [`UpdateOp`] -- path-targeted update operators (`$set`, `$push`, ...)
//! - [`Stage`] -- aggregation pipeline stages
//! - [`BulkOp`] / [`BulkResult`] -- batched writes with per-item errors
//!
//! # Backends
//!
//! - [`InMemoryStore`] -- `HashMap`-based store implementing both traits, for
//!   tests and embedding
//!
//! # Design Rules
//!
//! 1. Single-document operations are atomic; nothing here spans documents.
//! 2. No retries: every backend error is returned to the caller unchanged.
//! 3. Bulk submissions report partial failure instead of rolling back.

pub mod bulk;
pub mod error;
pub mod memory;
pub mod query;
pub mod traits;

// Re-export primary types at crate root for ergonomic imports.
pub use bulk::{BulkItemError, BulkOp, BulkResult};
pub use error::{StoreError, StoreResult};
pub use memory::{InMemoryStore, OpStats};
pub use query::{
    AggregateOptions, Condition, Criteria, DeleteResult, Projection, Stage, UpdateOp,
    UpdateResult,
};
pub use traits::{AsyncCollaborator, Collaborator};

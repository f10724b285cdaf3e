use docmap_store::{BulkResult, StoreError};
use docmap_types::{ObjectId, TypeError};
use thiserror::Error;

/// Errors raised by the document layer.
///
/// Every error is raised at the point of violation. Nothing here is retried
/// or swallowed; collaborator failures pass through as [`OdmError::Store`].
#[derive(Debug, Error)]
pub enum OdmError {
    /// Read of a field excluded by the projection the document was loaded with.
    #[error("field {0:?} is not loaded")]
    NotLoaded(String),

    /// Read of a field that was never assigned and has no default.
    #[error("field {0:?} is not set")]
    AttributeNotSet(String),

    /// The schema has no field with this name.
    #[error("{schema} has no field {field:?}")]
    UnknownField { schema: String, field: String },

    /// A reference points at a document that does not exist.
    #[error("broken reference to {schema} {id}")]
    BrokenReference { schema: String, id: ObjectId },

    /// A document expected in storage is gone.
    #[error("{collection} has no document {id}")]
    DocumentNotFound { collection: String, id: ObjectId },

    /// Dereferencing requires the owning document to be bound to a database.
    #[error("document is not bound to a database")]
    NotBindingToDatabase,

    /// Access to a reference list that has not been resolved yet.
    #[error("reference list is not resolved")]
    NotResolved,

    /// `resolve()` called on an already resolved reference list.
    #[error("reference list is already resolved")]
    AlreadyResolved,

    /// A value was rejected by validation.
    #[error("invalid value: {0}")]
    Value(String),

    /// A value has the wrong type for its codec.
    #[error("type mismatch: expected {expected}, got {found}")]
    Type { expected: String, found: String },

    /// Positional access outside the container.
    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// A protocol invariant was violated (corrupted records, writes to
    /// constant fields, direct ops on detached containers, ...).
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// Dotted-path or identifier parsing failure.
    #[error("type error: {0}")]
    Parse(#[from] TypeError),

    /// Error reported by the storage collaborator.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// One or more items of a bulk write failed. Carries the partial result.
    #[error("bulk write failed: {0}")]
    BulkWrite(Box<BulkResult>),
}

impl OdmError {
    pub(crate) fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::Type {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

/// Result alias for document-layer operations.
pub type OdmResult<T> = Result<T, OdmError>;

use docmap_types::{ObjectId, TypeError};

/// Errors from storage collaborator operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    /// A document with this `_id` already exists in the collection.
    #[error("duplicate key in {collection}: {id}")]
    DuplicateKey { collection: String, id: ObjectId },

    /// An update operator cannot be applied to the targeted value.
    #[error("cannot apply {op} at {path}: {reason}")]
    InvalidUpdate {
        op: &'static str,
        path: String,
        reason: String,
    },

    /// A record does not carry a usable `_id`.
    #[error("invalid document id: {0}")]
    InvalidId(String),

    /// A dotted path could not be walked.
    #[error("path error: {0}")]
    Path(#[from] TypeError),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Failure reported by the backend itself.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

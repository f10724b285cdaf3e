use docmap_types::{ObjectId, RawDoc};
use serde::{Deserialize, Serialize};

use crate::query::{Criteria, UpdateOp};

/// One write command inside a bulk submission.
#[derive(Clone, Debug, PartialEq)]
pub enum BulkOp {
    Insert(RawDoc),
    UpdateOne {
        criteria: Criteria,
        ops: Vec<UpdateOp>,
        upsert: bool,
    },
    DeleteOne(Criteria),
    DeleteMany(Criteria),
}

impl BulkOp {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert(_) => "insert",
            Self::UpdateOne { .. } => "update_one",
            Self::DeleteOne(_) => "delete_one",
            Self::DeleteMany(_) => "delete_many",
        }
    }
}

/// A per-item failure inside a bulk submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Position of the failing op across everything submitted so far.
    pub index: usize,
    pub message: String,
}

/// Aggregated outcome of one or more bulk submissions.
///
/// Counters cover every op that succeeded; `errors` lists the ops that did
/// not. A non-empty `errors` with non-zero counters is a partial success.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkResult {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub removed: u64,
    pub upserted: u64,
    pub inserted_ids: Vec<ObjectId>,
    pub upserted_ids: Vec<ObjectId>,
    pub errors: Vec<BulkItemError>,
}

impl BulkResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold a later submission into this one, shifting its error indices by
    /// `offset` so they stay relative to the whole sequence.
    pub fn merge(&mut self, other: BulkResult, offset: usize) {
        self.inserted += other.inserted;
        self.matched += other.matched;
        self.modified += other.modified;
        self.removed += other.removed;
        self.upserted += other.upserted;
        self.inserted_ids.extend(other.inserted_ids);
        self.upserted_ids.extend(other.upserted_ids);
        self.errors.extend(other.errors.into_iter().map(|e| BulkItemError {
            index: e.index + offset,
            message: e.message,
        }));
    }
}

impl std::fmt::Display for BulkResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "inserted={} matched={} modified={} removed={} upserted={} errors={}",
            self.inserted,
            self.matched,
            self.modified,
            self.removed,
            self.upserted,
            self.errors.len()
        )
    }
}

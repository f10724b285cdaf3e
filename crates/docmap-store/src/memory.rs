use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use docmap_types::{ObjectId, Raw, RawDoc};
use tracing::debug;

use crate::bulk::{BulkItemError, BulkOp, BulkResult};
use crate::error::{StoreError, StoreResult};
use crate::query::{
    run_pipeline, AggregateOptions, Criteria, DeleteResult, Projection, Stage, UpdateOp,
    UpdateResult,
};
use crate::traits::{AsyncCollaborator, Collaborator};

/// Snapshot of how many round trips each operation kind has served.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct OpStats {
    pub find: u64,
    pub insert: u64,
    pub update: u64,
    pub delete: u64,
    pub aggregate: u64,
    pub bulk: u64,
}

impl OpStats {
    /// Total round trips of any kind.
    pub fn total(&self) -> u64 {
        self.find + self.insert + self.update + self.delete + self.aggregate + self.bulk
    }
}

#[derive(Default)]
struct Counters {
    find: AtomicU64,
    insert: AtomicU64,
    update: AtomicU64,
    delete: AtomicU64,
    aggregate: AtomicU64,
    bulk: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// In-memory, HashMap-based document store.
///
/// Intended for tests and embedding. Collections are vectors of records in
/// insertion order behind a `RwLock`. Records are cloned on read and write.
/// Implements both [`Collaborator`] and [`AsyncCollaborator`]; the suspending
/// flavour completes without ever yielding.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Vec<RawDoc>>>,
    counters: Counters,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            counters: Counters::default(),
        }
    }

    /// Number of records in `collection`.
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .expect("lock poisoned")
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Returns `true` if no collection holds any record.
    pub fn is_empty(&self) -> bool {
        self.collections
            .read()
            .expect("lock poisoned")
            .values()
            .all(Vec::is_empty)
    }

    /// Raw record stored under `id`, bypassing the operation counters.
    pub fn peek(&self, collection: &str, id: ObjectId) -> Option<RawDoc> {
        let map = self.collections.read().expect("lock poisoned");
        map.get(collection)?
            .iter()
            .find(|doc| doc.get("_id") == Some(&Raw::Id(id)))
            .cloned()
    }

    /// Remove all records from every collection.
    pub fn clear(&self) {
        self.collections.write().expect("lock poisoned").clear();
    }

    /// Round trips served so far.
    pub fn stats(&self) -> OpStats {
        let c = &self.counters;
        OpStats {
            find: c.find.load(Ordering::Relaxed),
            insert: c.insert.load(Ordering::Relaxed),
            update: c.update.load(Ordering::Relaxed),
            delete: c.delete.load(Ordering::Relaxed),
            aggregate: c.aggregate.load(Ordering::Relaxed),
            bulk: c.bulk.load(Ordering::Relaxed),
        }
    }

    fn insert_into(records: &mut Vec<RawDoc>, collection: &str, mut doc: RawDoc) -> StoreResult<ObjectId> {
        let id = match doc.get("_id") {
            None | Some(Raw::Null) => {
                let id = ObjectId::new();
                doc.insert("_id".into(), Raw::Id(id));
                id
            }
            Some(Raw::Id(id)) => *id,
            Some(other) => {
                return Err(StoreError::InvalidId(format!(
                    "expected objectid, got {}",
                    other.type_name()
                )))
            }
        };
        if records.iter().any(|r| r.get("_id") == Some(&Raw::Id(id))) {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                id,
            });
        }
        records.push(doc);
        Ok(id)
    }

    fn update_in(
        records: &mut Vec<RawDoc>,
        criteria: &Criteria,
        ops: &[UpdateOp],
    ) -> StoreResult<UpdateResult> {
        let Some(record) = records.iter_mut().find(|r| criteria.matches(r)) else {
            return Ok(UpdateResult::default());
        };
        // Apply to a scratch copy so a failing op leaves the record untouched.
        let mut scratch = record.clone();
        let mut modified = false;
        for op in ops {
            modified |= op.apply(&mut scratch)?;
        }
        *record = scratch;
        Ok(UpdateResult {
            matched: 1,
            modified: u64::from(modified),
        })
    }

    fn upsert_in(
        records: &mut Vec<RawDoc>,
        collection: &str,
        criteria: &Criteria,
        ops: &[UpdateOp],
    ) -> StoreResult<ObjectId> {
        let mut doc = RawDoc::new();
        for condition in criteria.conditions() {
            if let crate::query::Condition::Eq(p, value) = condition {
                docmap_types::path::set(&mut doc, p, value.clone())?;
            }
        }
        for op in ops {
            op.apply(&mut doc)?;
        }
        Self::insert_into(records, collection, doc)
    }

    fn delete_in(records: &mut Vec<RawDoc>, criteria: &Criteria, many: bool) -> DeleteResult {
        let before = records.len();
        if many {
            records.retain(|r| !criteria.matches(r));
        } else if let Some(pos) = records.iter().position(|r| criteria.matches(r)) {
            records.remove(pos);
        }
        DeleteResult {
            removed: (before - records.len()) as u64,
        }
    }

    fn apply_bulk_op(
        records: &mut Vec<RawDoc>,
        collection: &str,
        op: BulkOp,
        result: &mut BulkResult,
    ) -> StoreResult<()> {
        match op {
            BulkOp::Insert(doc) => {
                let id = Self::insert_into(records, collection, doc)?;
                result.inserted += 1;
                result.inserted_ids.push(id);
            }
            BulkOp::UpdateOne {
                criteria,
                ops,
                upsert,
            } => {
                let outcome = Self::update_in(records, &criteria, &ops)?;
                if outcome.matched == 0 && upsert {
                    let id = Self::upsert_in(records, collection, &criteria, &ops)?;
                    result.upserted += 1;
                    result.upserted_ids.push(id);
                } else {
                    result.matched += outcome.matched;
                    result.modified += outcome.modified;
                }
            }
            BulkOp::DeleteOne(criteria) => {
                result.removed += Self::delete_in(records, &criteria, false).removed;
            }
            BulkOp::DeleteMany(criteria) => {
                result.removed += Self::delete_in(records, &criteria, true).removed;
            }
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Collaborator for InMemoryStore {
    fn find(
        &self,
        collection: &str,
        criteria: &Criteria,
        projection: &Projection,
    ) -> StoreResult<Vec<RawDoc>> {
        bump(&self.counters.find);
        let map = self.collections.read().expect("lock poisoned");
        let found: Vec<RawDoc> = map
            .get(collection)
            .map(|records| {
                records
                    .iter()
                    .filter(|r| criteria.matches(r))
                    .map(|r| projection.apply(r))
                    .collect()
            })
            .unwrap_or_default();
        debug!(collection, count = found.len(), "find");
        Ok(found)
    }

    fn insert_one(&self, collection: &str, doc: RawDoc) -> StoreResult<ObjectId> {
        bump(&self.counters.insert);
        let mut map = self.collections.write().expect("lock poisoned");
        let records = map.entry(collection.to_string()).or_default();
        let id = Self::insert_into(records, collection, doc)?;
        debug!(collection, %id, "insert_one");
        Ok(id)
    }

    fn update_one(
        &self,
        collection: &str,
        criteria: &Criteria,
        ops: &[UpdateOp],
    ) -> StoreResult<UpdateResult> {
        bump(&self.counters.update);
        let mut map = self.collections.write().expect("lock poisoned");
        let records = map.entry(collection.to_string()).or_default();
        let result = Self::update_in(records, criteria, ops)?;
        debug!(
            collection,
            ops = ops.len(),
            matched = result.matched,
            modified = result.modified,
            "update_one"
        );
        Ok(result)
    }

    fn delete_one(&self, collection: &str, criteria: &Criteria) -> StoreResult<DeleteResult> {
        bump(&self.counters.delete);
        let mut map = self.collections.write().expect("lock poisoned");
        let records = map.entry(collection.to_string()).or_default();
        Ok(Self::delete_in(records, criteria, false))
    }

    fn delete_many(&self, collection: &str, criteria: &Criteria) -> StoreResult<DeleteResult> {
        bump(&self.counters.delete);
        let mut map = self.collections.write().expect("lock poisoned");
        let records = map.entry(collection.to_string()).or_default();
        Ok(Self::delete_in(records, criteria, true))
    }

    fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
        _options: &AggregateOptions,
    ) -> StoreResult<Vec<RawDoc>> {
        bump(&self.counters.aggregate);
        let map = self.collections.read().expect("lock poisoned");
        let records = map.get(collection).cloned().unwrap_or_default();
        Ok(run_pipeline(records, pipeline))
    }

    fn bulk_submit(
        &self,
        collection: &str,
        ops: Vec<BulkOp>,
        ordered: bool,
    ) -> StoreResult<BulkResult> {
        bump(&self.counters.bulk);
        let mut map = self.collections.write().expect("lock poisoned");
        let records = map.entry(collection.to_string()).or_default();
        let mut result = BulkResult::default();
        for (index, op) in ops.into_iter().enumerate() {
            if let Err(e) = Self::apply_bulk_op(records, collection, op, &mut result) {
                result.errors.push(BulkItemError {
                    index,
                    message: e.to_string(),
                });
                if ordered {
                    break;
                }
            }
        }
        debug!(collection, ordered, %result, "bulk_submit");
        Ok(result)
    }
}

#[async_trait]
impl AsyncCollaborator for InMemoryStore {
    async fn find(
        &self,
        collection: &str,
        criteria: &Criteria,
        projection: &Projection,
    ) -> StoreResult<Vec<RawDoc>> {
        Collaborator::find(self, collection, criteria, projection)
    }

    async fn insert_one(&self, collection: &str, doc: RawDoc) -> StoreResult<ObjectId> {
        Collaborator::insert_one(self, collection, doc)
    }

    async fn update_one(
        &self,
        collection: &str,
        criteria: &Criteria,
        ops: &[UpdateOp],
    ) -> StoreResult<UpdateResult> {
        Collaborator::update_one(self, collection, criteria, ops)
    }

    async fn delete_one(
        &self,
        collection: &str,
        criteria: &Criteria,
    ) -> StoreResult<DeleteResult> {
        Collaborator::delete_one(self, collection, criteria)
    }

    async fn delete_many(
        &self,
        collection: &str,
        criteria: &Criteria,
    ) -> StoreResult<DeleteResult> {
        Collaborator::delete_many(self, collection, criteria)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
        options: &AggregateOptions,
    ) -> StoreResult<Vec<RawDoc>> {
        Collaborator::aggregate(self, collection, pipeline, options)
    }

    async fn bulk_submit(
        &self,
        collection: &str,
        ops: Vec<BulkOp>,
        ordered: bool,
    ) -> StoreResult<BulkResult> {
        Collaborator::bulk_submit(self, collection, ops, ordered)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let map = self.collections.read().expect("lock poisoned");
        f.debug_struct("InMemoryStore")
            .field("collections", &map.len())
            .field("stats", &self.stats())
            .finish()
    }
}

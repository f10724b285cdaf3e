use async_trait::async_trait;
use docmap_types::{ObjectId, RawDoc};

use crate::bulk::{BulkOp, BulkResult};
use crate::error::StoreResult;
use crate::query::{
    AggregateOptions, Criteria, DeleteResult, Projection, Stage, UpdateOp, UpdateResult,
};

/// Blocking document-store collaborator.
///
/// All implementations must satisfy these invariants:
/// - Single-document operations are atomic.
/// - `insert_one` assigns a fresh `_id` when the record has none and returns
///   the id the record was stored under.
/// - `find` returns records in storage order; callers that need another
///   order sort or reorder themselves.
/// - Errors are returned, never retried.
pub trait Collaborator: Send + Sync {
    /// All records in `collection` matching `criteria`, shaped by `projection`.
    fn find(
        &self,
        collection: &str,
        criteria: &Criteria,
        projection: &Projection,
    ) -> StoreResult<Vec<RawDoc>>;

    /// Insert one record and return its `_id`.
    fn insert_one(&self, collection: &str, doc: RawDoc) -> StoreResult<ObjectId>;

    /// Apply `ops` to the first record matching `criteria`.
    fn update_one(
        &self,
        collection: &str,
        criteria: &Criteria,
        ops: &[UpdateOp],
    ) -> StoreResult<UpdateResult>;

    /// Delete every record matching `criteria`.
    fn delete_many(&self, collection: &str, criteria: &Criteria) -> StoreResult<DeleteResult>;

    /// Run an aggregation pipeline.
    fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
        options: &AggregateOptions,
    ) -> StoreResult<Vec<RawDoc>>;

    /// Execute a batch of write commands.
    ///
    /// Per-item failures are reported in [`BulkResult::errors`]; an ordered
    /// batch stops at the first failure, an unordered one continues.
    fn bulk_submit(
        &self,
        collection: &str,
        ops: Vec<BulkOp>,
        ordered: bool,
    ) -> StoreResult<BulkResult>;

    /// First record matching `criteria`, if any.
    fn find_one(
        &self,
        collection: &str,
        criteria: &Criteria,
        projection: &Projection,
    ) -> StoreResult<Option<RawDoc>> {
        Ok(self
            .find(collection, criteria, projection)?
            .into_iter()
            .next())
    }

    /// Insert several records, returning their ids in input order.
    ///
    /// Default implementation calls `insert_one()` for each record.
    fn insert_many(&self, collection: &str, docs: Vec<RawDoc>) -> StoreResult<Vec<ObjectId>> {
        docs.into_iter()
            .map(|doc| self.insert_one(collection, doc))
            .collect()
    }

    /// Delete the first record matching `criteria`.
    fn delete_one(&self, collection: &str, criteria: &Criteria) -> StoreResult<DeleteResult>;

    /// Number of records matching `criteria`.
    fn count(&self, collection: &str, criteria: &Criteria) -> StoreResult<u64> {
        Ok(self
            .find(collection, criteria, &Projection::include(["_id"]))?
            .len() as u64)
    }
}

/// Suspending document-store collaborator.
///
/// Same contract as [`Collaborator`], with every operation a suspension
/// point.
#[async_trait]
pub trait AsyncCollaborator: Send + Sync {
    async fn find(
        &self,
        collection: &str,
        criteria: &Criteria,
        projection: &Projection,
    ) -> StoreResult<Vec<RawDoc>>;

    async fn insert_one(&self, collection: &str, doc: RawDoc) -> StoreResult<ObjectId>;

    async fn update_one(
        &self,
        collection: &str,
        criteria: &Criteria,
        ops: &[UpdateOp],
    ) -> StoreResult<UpdateResult>;

    async fn delete_one(&self, collection: &str, criteria: &Criteria)
        -> StoreResult<DeleteResult>;

    async fn delete_many(
        &self,
        collection: &str,
        criteria: &Criteria,
    ) -> StoreResult<DeleteResult>;

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: &[Stage],
        options: &AggregateOptions,
    ) -> StoreResult<Vec<RawDoc>>;

    async fn bulk_submit(
        &self,
        collection: &str,
        ops: Vec<BulkOp>,
        ordered: bool,
    ) -> StoreResult<BulkResult>;

    async fn find_one(
        &self,
        collection: &str,
        criteria: &Criteria,
        projection: &Projection,
    ) -> StoreResult<Option<RawDoc>> {
        Ok(self
            .find(collection, criteria, projection)
            .await?
            .into_iter()
            .next())
    }

    async fn insert_many(
        &self,
        collection: &str,
        docs: Vec<RawDoc>,
    ) -> StoreResult<Vec<ObjectId>> {
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            ids.push(self.insert_one(collection, doc).await?);
        }
        Ok(ids)
    }

    async fn count(&self, collection: &str, criteria: &Criteria) -> StoreResult<u64> {
        Ok(self
            .find(collection, criteria, &Projection::include(["_id"]))
            .await?
            .len() as u64)
    }
}

use std::sync::Arc;

use docmap_document::{fake_document, Backend, Document, FakeContext, Schema};
use docmap_store::{AggregateOptions, AsyncCollaborator, Collaborator, Criteria, Projection, Stage};
use docmap_types::{ObjectId, RawDoc};
use tracing::debug;

use crate::bulk::{AsyncBulkWriter, BulkWriter};
use crate::config::OdmConfig;
use crate::error::SdkResult;
use crate::query::{AsyncQuerySet, QuerySet};
use crate::session::Session;

/// Document database over a blocking collaborator.
///
/// Documents loaded through `get` and `find` share a reference cache for the
/// duration of that one call; use [`Database::query`] for a longer-lived
/// scope.
pub struct Database {
    session: Session,
}

impl Database {
    pub fn new(store: Arc<dyn Collaborator>, config: OdmConfig) -> Self {
        Self {
            session: Session::new(Backend::Blocking(store), config),
        }
    }

    pub fn config(&self) -> &OdmConfig {
        self.session.config()
    }

    /// Name of the collection `schema` is stored in.
    pub fn collection<'s>(&self, schema: &'s Schema) -> SdkResult<&'s str> {
        Ok(schema.collection()?)
    }

    // ---- Document lifecycle ----

    /// Store the whole document. Its id is set and its changes cleared.
    pub fn insert(&self, doc: &Document) -> SdkResult<ObjectId> {
        Ok(self.session.insert(doc).wait()?)
    }

    /// Write pending changes; documents that were never stored are inserted.
    pub fn save(&self, doc: &Document) -> SdkResult<()> {
        Ok(self.session.save(doc).wait()?)
    }

    /// Refetch the stored record, dropping local changes.
    pub fn reload(&self, doc: &Document, projection: Projection) -> SdkResult<()> {
        Ok(self.session.reload(doc, projection).wait()?)
    }

    pub fn remove(&self, doc: &Document) -> SdkResult<()> {
        Ok(self.session.remove(doc).wait()?)
    }

    // ---- Queries ----

    pub fn get(&self, schema: &Arc<Schema>, id: ObjectId) -> SdkResult<Document> {
        self.get_projected(schema, id, Projection::All)
    }

    pub fn get_projected(
        &self,
        schema: &Arc<Schema>,
        id: ObjectId,
        projection: Projection,
    ) -> SdkResult<Document> {
        let cache = self.session.new_cache();
        Ok(self.session.get(schema, id, projection, cache).wait()?)
    }

    pub fn find(
        &self,
        schema: &Arc<Schema>,
        criteria: Criteria,
        projection: Projection,
    ) -> SdkResult<Vec<Document>> {
        let cache = self.session.new_cache();
        Ok(self.session.find(schema, criteria, projection, cache).wait()?)
    }

    pub fn count(&self, schema: &Schema, criteria: Criteria) -> SdkResult<u64> {
        Ok(self.session.count(schema, criteria).wait()?)
    }

    /// Run a pipeline over the collection of `schema`. Results stay raw.
    pub fn aggregate(
        &self,
        schema: &Schema,
        pipeline: Vec<Stage>,
        options: AggregateOptions,
    ) -> SdkResult<Vec<RawDoc>> {
        Ok(self.session.aggregate(schema, pipeline, options).wait()?)
    }

    pub fn query(&self, schema: &Arc<Schema>) -> QuerySet<'_> {
        QuerySet::new(&self.session, schema)
    }

    pub fn bulk(&self) -> BulkWriter<'_> {
        BulkWriter::new(&self.session)
    }

    /// Generate a document of `schema`, store it and run its
    /// `after_persist` hook. `depth` defaults to the configured one.
    pub fn fake(&self, schema: &Arc<Schema>, depth: Option<i32>, ctx: &mut FakeContext) -> SdkResult<Document> {
        let depth = depth.unwrap_or(self.config().fake_depth);
        let doc = fake_document(schema, depth, ctx)?;
        let id = self.insert(&doc)?;
        debug!(schema = schema.name(), %id, depth, "fake document stored");
        if let Some(hooks) = schema.hooks() {
            hooks.after_persist(&doc, ctx)?;
        }
        Ok(doc)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", self.config())
            .finish_non_exhaustive()
    }
}

/// Document database over a suspending collaborator. Every remote operation
/// is awaited; state changes land only once it completes.
pub struct AsyncDatabase {
    session: Session,
}

impl AsyncDatabase {
    pub fn new(store: Arc<dyn AsyncCollaborator>, config: OdmConfig) -> Self {
        Self {
            session: Session::new(Backend::Suspending(store), config),
        }
    }

    pub fn config(&self) -> &OdmConfig {
        self.session.config()
    }

    pub fn collection<'s>(&self, schema: &'s Schema) -> SdkResult<&'s str> {
        Ok(schema.collection()?)
    }

    // ---- Document lifecycle ----

    pub async fn insert(&self, doc: &Document) -> SdkResult<ObjectId> {
        Ok(self.session.insert(doc).await?)
    }

    pub async fn save(&self, doc: &Document) -> SdkResult<()> {
        Ok(self.session.save(doc).await?)
    }

    pub async fn reload(&self, doc: &Document, projection: Projection) -> SdkResult<()> {
        Ok(self.session.reload(doc, projection).await?)
    }

    pub async fn remove(&self, doc: &Document) -> SdkResult<()> {
        Ok(self.session.remove(doc).await?)
    }

    // ---- Queries ----

    pub async fn get(&self, schema: &Arc<Schema>, id: ObjectId) -> SdkResult<Document> {
        self.get_projected(schema, id, Projection::All).await
    }

    pub async fn get_projected(
        &self,
        schema: &Arc<Schema>,
        id: ObjectId,
        projection: Projection,
    ) -> SdkResult<Document> {
        let cache = self.session.new_cache();
        Ok(self.session.get(schema, id, projection, cache).await?)
    }

    pub async fn find(
        &self,
        schema: &Arc<Schema>,
        criteria: Criteria,
        projection: Projection,
    ) -> SdkResult<Vec<Document>> {
        let cache = self.session.new_cache();
        Ok(self.session.find(schema, criteria, projection, cache).await?)
    }

    pub async fn count(&self, schema: &Schema, criteria: Criteria) -> SdkResult<u64> {
        Ok(self.session.count(schema, criteria).await?)
    }

    pub async fn aggregate(
        &self,
        schema: &Schema,
        pipeline: Vec<Stage>,
        options: AggregateOptions,
    ) -> SdkResult<Vec<RawDoc>> {
        Ok(self.session.aggregate(schema, pipeline, options).await?)
    }

    pub fn query(&self, schema: &Arc<Schema>) -> AsyncQuerySet<'_> {
        AsyncQuerySet::new(&self.session, schema)
    }

    pub fn bulk(&self) -> AsyncBulkWriter<'_> {
        AsyncBulkWriter::new(&self.session)
    }

    pub async fn fake(
        &self,
        schema: &Arc<Schema>,
        depth: Option<i32>,
        ctx: &mut FakeContext,
    ) -> SdkResult<Document> {
        let depth = depth.unwrap_or(self.config().fake_depth);
        let doc = fake_document(schema, depth, ctx)?;
        let id = self.insert(&doc).await?;
        debug!(schema = schema.name(), %id, depth, "fake document stored");
        if let Some(hooks) = schema.hooks() {
            hooks.after_persist(&doc, ctx)?;
        }
        Ok(doc)
    }
}

impl std::fmt::Debug for AsyncDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncDatabase")
            .field("config", self.config())
            .finish_non_exhaustive()
    }
}

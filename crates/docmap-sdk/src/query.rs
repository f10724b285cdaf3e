//! Schema-scoped query surfaces.
//!
//! A query set owns one reference cache. Every document it loads is bound to
//! that cache, so documents reached through references of its results are
//! shared instead of fetched again. The cache dies with the query set and
//! with the documents that still hold it.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;

use docmap_document::{Document, ReferenceCache, Schema};
use docmap_store::{Criteria, Projection};
use docmap_types::ObjectId;

use crate::error::SdkResult;
use crate::session::Session;

/// Put `docs` in the order of `ids`. Ids without a document are skipped.
fn order_by_ids(docs: Vec<Document>, ids: &[ObjectId]) -> Vec<Document> {
    let mut by_id: HashMap<ObjectId, Document> = docs
        .into_iter()
        .filter_map(|doc| Some((doc.id()?, doc)))
        .collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

/// Blocking query set.
pub struct QuerySet<'db> {
    session: &'db Session,
    schema: Arc<Schema>,
    cache: Rc<RefCell<ReferenceCache>>,
}

impl<'db> QuerySet<'db> {
    pub(crate) fn new(session: &'db Session, schema: &Arc<Schema>) -> Self {
        Self {
            session,
            schema: Arc::clone(schema),
            cache: session.new_cache(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn find(&self, criteria: Criteria) -> SdkResult<Vec<Document>> {
        self.find_projected(criteria, Projection::All)
    }

    /// Projected results read the left-out fields as not loaded and are
    /// never placed in the cache.
    pub fn find_projected(&self, criteria: Criteria, projection: Projection) -> SdkResult<Vec<Document>> {
        let docs = self
            .session
            .find(&self.schema, criteria, projection, Rc::clone(&self.cache))
            .wait()?;
        Ok(docs)
    }

    pub fn find_one(&self, criteria: Criteria) -> SdkResult<Option<Document>> {
        let doc = self
            .session
            .find_one(&self.schema, criteria, Projection::All, Rc::clone(&self.cache))
            .wait()?;
        Ok(doc)
    }

    /// Documents with the given ids, in the order given.
    pub fn find_in(&self, ids: &[ObjectId]) -> SdkResult<Vec<Document>> {
        let docs = self.find(Criteria::id_in(ids))?;
        Ok(order_by_ids(docs, ids))
    }

    pub fn get(&self, id: ObjectId) -> SdkResult<Document> {
        let doc = self
            .session
            .get(&self.schema, id, Projection::All, Rc::clone(&self.cache))
            .wait()?;
        Ok(doc)
    }

    pub fn count(&self, criteria: Criteria) -> SdkResult<u64> {
        Ok(self.session.count(&self.schema, criteria).wait()?)
    }

    /// Number of documents currently held by the reference cache.
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }
}

/// Suspending query set.
pub struct AsyncQuerySet<'db> {
    session: &'db Session,
    schema: Arc<Schema>,
    cache: Rc<RefCell<ReferenceCache>>,
}

impl<'db> AsyncQuerySet<'db> {
    pub(crate) fn new(session: &'db Session, schema: &Arc<Schema>) -> Self {
        Self {
            session,
            schema: Arc::clone(schema),
            cache: session.new_cache(),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub async fn find(&self, criteria: Criteria) -> SdkResult<Vec<Document>> {
        self.find_projected(criteria, Projection::All).await
    }

    pub async fn find_projected(
        &self,
        criteria: Criteria,
        projection: Projection,
    ) -> SdkResult<Vec<Document>> {
        let docs = self
            .session
            .find(&self.schema, criteria, projection, Rc::clone(&self.cache))
            .await?;
        Ok(docs)
    }

    pub async fn find_one(&self, criteria: Criteria) -> SdkResult<Option<Document>> {
        let doc = self
            .session
            .find_one(&self.schema, criteria, Projection::All, Rc::clone(&self.cache))
            .await?;
        Ok(doc)
    }

    pub async fn find_in(&self, ids: &[ObjectId]) -> SdkResult<Vec<Document>> {
        let docs = self.find(Criteria::id_in(ids)).await?;
        Ok(order_by_ids(docs, ids))
    }

    pub async fn get(&self, id: ObjectId) -> SdkResult<Document> {
        let doc = self
            .session
            .get(&self.schema, id, Projection::All, Rc::clone(&self.cache))
            .await?;
        Ok(doc)
    }

    pub async fn count(&self, criteria: Criteria) -> SdkResult<u64> {
        Ok(self.session.count(&self.schema, criteria).await?)
    }

    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use docmap_document::{IntCodec, OdmError, SchemaBuilder, StrCodec};
    use docmap_store::InMemoryStore;

    use super::*;
    use crate::config::OdmConfig;
    use crate::database::{AsyncDatabase, Database};

    fn people() -> Arc<Schema> {
        SchemaBuilder::document("Person", "people")
            .field("name", StrCodec::new())
            .field("age", IntCodec::new())
            .build()
    }

    fn seed(db: &Database, names: &[&str]) -> Vec<ObjectId> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let doc = Document::new(people());
                doc.set("name", *name).unwrap();
                doc.set("age", i as i64).unwrap();
                db.insert(&doc).unwrap()
            })
            .collect()
    }

    #[test]
    fn find_shares_instances_through_the_cache() {
        let store = Arc::new(InMemoryStore::new());
        let db = Database::new(store.clone(), OdmConfig::default());
        let ids = seed(&db, &["ann", "bob"]);
        let qs = db.query(&people());

        let first = qs.find(Criteria::all()).unwrap();
        assert_eq!(qs.cached(), 2);
        let again = qs.get(ids[0]).unwrap();
        assert!(again.ptr_eq(&first[0]) || again.ptr_eq(&first[1]));
        assert_eq!(store.stats().find, 1);
    }

    #[test]
    fn find_in_keeps_the_requested_order() {
        let store = Arc::new(InMemoryStore::new());
        let db = Database::new(store, OdmConfig::default());
        let ids = seed(&db, &["ann", "bob", "cid"]);
        let qs = db.query(&people());
        let wanted = [ids[2], ObjectId::new(), ids[0]];
        let docs = qs.find_in(&wanted).unwrap();
        let names: Vec<String> = docs
            .iter()
            .map(|d| d.get("name").unwrap().as_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["cid", "ann"]);
    }

    #[test]
    fn projected_results_bypass_the_cache() {
        let store = Arc::new(InMemoryStore::new());
        let db = Database::new(store, OdmConfig::default());
        seed(&db, &["ann"]);
        let qs = db.query(&people());
        let docs = qs
            .find_projected(Criteria::all(), Projection::include(["name"]))
            .unwrap();
        assert_eq!(qs.cached(), 0);
        assert!(matches!(docs[0].get("age"), Err(OdmError::NotLoaded(f)) if f == "age"));
    }

    #[test]
    fn projected_reload_evicts_the_cached_instance() {
        let store = Arc::new(InMemoryStore::new());
        let db = Database::new(store.clone(), OdmConfig::default());
        let ids = seed(&db, &["ann"]);
        let qs = db.query(&people());
        let doc = qs.get(ids[0]).unwrap();
        assert_eq!(qs.cached(), 1);

        db.reload(&doc, Projection::include(["name"])).unwrap();
        assert_eq!(qs.cached(), 0);
        let fresh = qs.get(ids[0]).unwrap();
        assert!(!fresh.ptr_eq(&doc));
        assert_eq!(fresh.get("age").unwrap(), docmap_document::Value::Int(0));
        assert_eq!(store.stats().find, 3);
    }

    #[test]
    fn missing_document_is_reported() {
        let db = Database::new(Arc::new(InMemoryStore::new()), OdmConfig::default());
        let qs = db.query(&people());
        let err = qs.get(ObjectId::new()).unwrap_err();
        assert!(matches!(err.as_odm(), Some(OdmError::DocumentNotFound { .. })));
        assert!(qs.find_one(Criteria::all().eq("name", "x")).unwrap().is_none());
    }

    #[test]
    fn cache_capacity_follows_config() {
        let store = Arc::new(InMemoryStore::new());
        let db = Database::new(
            store,
            OdmConfig {
                reference_cache_size: 2,
                ..OdmConfig::default()
            },
        );
        seed(&db, &["a", "b", "c"]);
        let qs = db.query(&people());
        qs.find(Criteria::all()).unwrap();
        assert_eq!(qs.cached(), 2);
        qs.clear_cache();
        assert_eq!(qs.cached(), 0);
    }

    #[tokio::test]
    async fn async_query_set_counts_and_gets() {
        let store = Arc::new(InMemoryStore::new());
        let db = AsyncDatabase::new(store, OdmConfig::default());
        let doc = Document::new(people());
        doc.set("name", "ann").unwrap();
        let id = db.insert(&doc).await.unwrap();

        let qs = db.query(&people());
        assert_eq!(qs.count(Criteria::all()).await.unwrap(), 1);
        let loaded = qs.get(id).await.unwrap();
        assert_eq!(loaded.get("name").unwrap().as_str(), Some("ann"));
        let same = qs.get(id).await.unwrap();
        assert!(same.ptr_eq(&loaded));
    }
}

//! Execution-model-neutral database operations.
//!
//! Every method plans its request, hands it to the backend and applies the
//! outcome to document state in a continuation. The blocking facade waits on
//! the returned [`Pending`], the suspending one awaits it.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use docmap_document::{
    from_storage, materialize, not_loaded_for, to_storage, Backend, Binding, Document,
    EncodeOptions, LogEntry, OdmError, OdmResult, Pending, ReferenceCache, Schema, ID_FIELD,
};
use docmap_store::{AggregateOptions, Criteria, Projection, Stage};
use docmap_types::{ObjectId, RawDoc};
use tracing::debug;

use crate::config::OdmConfig;

#[derive(Clone, Debug)]
pub(crate) struct Session {
    backend: Backend,
    config: OdmConfig,
}

/// Collection a root document is stored in.
pub(crate) fn stored_collection(doc: &Document) -> OdmResult<String> {
    if !doc.is_root() {
        return Err(OdmError::Protocol(format!(
            "{} is embedded at {:?} and is stored through its root",
            doc.schema().name(),
            doc.path()
        )));
    }
    Ok(doc.schema().collection()?.to_string())
}

/// Id of a document that has been stored, as opposed to one that only
/// carries an assigned id.
pub(crate) fn stored_id(doc: &Document) -> Option<ObjectId> {
    if doc.raw_names().iter().any(|n| n == ID_FIELD) {
        doc.id()
    } else {
        None
    }
}

pub(crate) fn require_stored(doc: &Document, action: &str) -> OdmResult<(String, ObjectId)> {
    let collection = stored_collection(doc)?;
    let id = stored_id(doc).ok_or_else(|| {
        OdmError::Protocol(format!(
            "cannot {action} a {} document that was never stored",
            doc.schema().name()
        ))
    })?;
    Ok((collection, id))
}

/// Build a bound document from a fetched record. Complete records go through
/// the dedup cache; projected ones are fresh instances that are never cached.
fn load(binding: &Binding, schema: &Arc<Schema>, record: RawDoc, not_loaded: &[String]) -> OdmResult<Document> {
    if not_loaded.is_empty() {
        return materialize(binding, schema, record);
    }
    let paths: Vec<&str> = not_loaded.iter().map(String::as_str).collect();
    let doc = from_storage(schema, record, &paths)?;
    doc.bind(binding.clone());
    Ok(doc)
}

/// Drop `doc` from its binding's reference cache so a partially reloaded
/// instance is never handed out as a complete one.
fn evict_cached(doc: &Document, id: ObjectId) {
    let Some(cache) = doc.binding().and_then(|binding| binding.cache) else {
        return;
    };
    let key = (doc.schema().name().to_string(), id);
    let mut cache = cache.borrow_mut();
    if cache.get(&key).is_some_and(|cached| cached.ptr_eq(doc)) {
        cache.remove(&key);
        debug!(schema = doc.schema().name(), %id, "evicted partially reloaded document");
    }
}

impl Session {
    pub fn new(backend: Backend, config: OdmConfig) -> Self {
        Self { backend, config }
    }

    pub fn config(&self) -> &OdmConfig {
        &self.config
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn new_cache(&self) -> Rc<RefCell<ReferenceCache>> {
        Rc::new(RefCell::new(ReferenceCache::new(
            self.config.reference_cache_size.max(1),
        )))
    }

    pub fn binding(&self, cache: Rc<RefCell<ReferenceCache>>) -> Binding {
        Binding::new(self.backend.clone()).with_cache(cache)
    }

    // ---- Document lifecycle ----

    pub fn insert(&self, doc: &Document) -> Pending<'static, ObjectId> {
        let prepared = stored_collection(doc).and_then(|collection| {
            let record = to_storage(doc, &EncodeOptions::default())?;
            Ok((collection, record))
        });
        let (collection, record) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Pending::fail(e),
        };
        debug!(collection = %collection, fields = record.len(), "insert");

        let doc = doc.clone();
        let binding = Binding::new(self.backend.clone());
        self.backend.insert_one(collection, record).map(move |id| {
            doc.mark_inserted(id);
            if !doc.is_bound() {
                doc.bind(binding);
            }
            doc.log_event(LogEntry::Insert { id });
            Ok(id)
        })
    }

    pub fn save(&self, doc: &Document) -> Pending<'static, ()> {
        let Some(id) = stored_id(doc) else {
            return self.insert(doc).map(|_| Ok(()));
        };
        let prepared = stored_collection(doc).and_then(|collection| Ok((collection, doc.save_ops()?)));
        let (collection, ops) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Pending::fail(e),
        };
        if ops.is_empty() {
            debug!(collection = %collection, %id, "save skipped, nothing changed");
            return Pending::ready(());
        }
        debug!(collection = %collection, %id, ops = ops.len(), "save");

        let doc = doc.clone();
        self.backend
            .update_one(collection.clone(), Criteria::id(id), ops)
            .map(move |result| {
                if result.matched == 0 {
                    return Err(OdmError::DocumentNotFound { collection, id });
                }
                doc.mark_saved();
                doc.log_event(LogEntry::Save { id });
                Ok(())
            })
    }

    pub fn reload(&self, doc: &Document, projection: Projection) -> Pending<'static, ()> {
        let (collection, id) = match require_stored(doc, "reload") {
            Ok(target) => target,
            Err(e) => return Pending::fail(e),
        };
        let not_loaded = not_loaded_for(doc.schema(), &projection);
        debug!(collection = %collection, %id, not_loaded = not_loaded.len(), "reload");

        let doc = doc.clone();
        self.backend
            .find_one(collection.clone(), Criteria::id(id), projection)
            .map(move |record| {
                let record = record.ok_or(OdmError::DocumentNotFound { collection, id })?;
                let paths: Vec<&str> = not_loaded.iter().map(String::as_str).collect();
                doc.replace_raw(record, &paths)?;
                if !paths.is_empty() {
                    evict_cached(&doc, id);
                }
                doc.log_event(LogEntry::Reload);
                Ok(())
            })
    }

    pub fn remove(&self, doc: &Document) -> Pending<'static, ()> {
        let (collection, id) = match require_stored(doc, "remove") {
            Ok(target) => target,
            Err(e) => return Pending::fail(e),
        };
        debug!(collection = %collection, %id, "remove");

        let doc = doc.clone();
        self.backend
            .delete_one(collection.clone(), Criteria::id(id))
            .map(move |result| {
                if result.removed == 0 {
                    return Err(OdmError::DocumentNotFound { collection, id });
                }
                doc.log_event(LogEntry::Remove { id });
                Ok(())
            })
    }

    // ---- Queries ----

    pub fn find(
        &self,
        schema: &Arc<Schema>,
        criteria: Criteria,
        projection: Projection,
        cache: Rc<RefCell<ReferenceCache>>,
    ) -> Pending<'static, Vec<Document>> {
        let collection = match schema.collection() {
            Ok(collection) => collection.to_string(),
            Err(e) => return Pending::fail(e),
        };
        let not_loaded = not_loaded_for(schema, &projection);
        debug!(
            collection = %collection,
            conditions = criteria.conditions().len(),
            projected = !projection.is_all(),
            "find"
        );

        let (binding, schema) = (self.binding(cache), Arc::clone(schema));
        self.backend
            .find(collection, criteria, projection)
            .map(move |records| {
                records
                    .into_iter()
                    .map(|record| load(&binding, &schema, record, &not_loaded))
                    .collect()
            })
    }

    pub fn find_one(
        &self,
        schema: &Arc<Schema>,
        criteria: Criteria,
        projection: Projection,
        cache: Rc<RefCell<ReferenceCache>>,
    ) -> Pending<'static, Option<Document>> {
        let collection = match schema.collection() {
            Ok(collection) => collection.to_string(),
            Err(e) => return Pending::fail(e),
        };
        let not_loaded = not_loaded_for(schema, &projection);
        debug!(collection = %collection, conditions = criteria.conditions().len(), "find_one");

        let (binding, schema) = (self.binding(cache), Arc::clone(schema));
        self.backend
            .find_one(collection, criteria, projection)
            .map(move |record| {
                record
                    .map(|record| load(&binding, &schema, record, &not_loaded))
                    .transpose()
            })
    }

    /// Document `id` of `schema`. A complete read served by `cache` costs no
    /// round trip.
    pub fn get(
        &self,
        schema: &Arc<Schema>,
        id: ObjectId,
        projection: Projection,
        cache: Rc<RefCell<ReferenceCache>>,
    ) -> Pending<'static, Document> {
        if projection.is_all() {
            let hit = cache
                .borrow()
                .get(&(schema.name().to_string(), id))
                .cloned();
            if let Some(doc) = hit {
                debug!(schema = schema.name(), %id, "get served from reference cache");
                return Pending::ready(doc);
            }
        }
        let collection = match schema.collection() {
            Ok(collection) => collection.to_string(),
            Err(e) => return Pending::fail(e),
        };
        self.find_one(schema, Criteria::id(id), projection, cache)
            .map(move |doc| doc.ok_or(OdmError::DocumentNotFound { collection, id }))
    }

    pub fn count(&self, schema: &Schema, criteria: Criteria) -> Pending<'static, u64> {
        let collection = match schema.collection() {
            Ok(collection) => collection.to_string(),
            Err(e) => return Pending::fail(e),
        };
        debug!(collection = %collection, conditions = criteria.conditions().len(), "count");
        self.backend.count(collection, criteria)
    }

    pub fn aggregate(
        &self,
        schema: &Schema,
        pipeline: Vec<Stage>,
        options: AggregateOptions,
    ) -> Pending<'static, Vec<RawDoc>> {
        let collection = match schema.collection() {
            Ok(collection) => collection.to_string(),
            Err(e) => return Pending::fail(e),
        };
        debug!(collection = %collection, stages = pipeline.len(), "aggregate");
        self.backend.aggregate(collection, pipeline, options)
    }
}

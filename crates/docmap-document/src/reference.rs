//! Lazy links to other root documents.
//!
//! A [`Reference`] stores only the target id and fetches the target on first
//! [`Reference::get`]. A [`ReferenceList`] stores a list of ids and resolves
//! them all in one batched query. Both go through the binding of the
//! document that holds them and, when present, through its dedup cache, so
//! that every holder of the same id sees the same target instance.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use docmap_store::{Criteria, Projection};
use docmap_types::{ObjectId, Raw, RawDoc};
use tracing::debug;

use crate::binding::{Binding, Pending};
use crate::cache::ReferenceKey;
use crate::document::{Anchor, Document};
use crate::error::{OdmError, OdmResult};
use crate::schema::{Schema, ID_FIELD};
use crate::serializer::from_storage;
use crate::value::Value;

fn cache_key(schema: &Schema, id: ObjectId) -> ReferenceKey {
    (schema.name().to_string(), id)
}

fn cached(binding: &Binding, schema: &Schema, id: ObjectId) -> Option<Document> {
    let cache = binding.cache.as_ref()?;
    let doc = cache.borrow().get(&cache_key(schema, id)).cloned();
    doc
}

/// Turn a fetched record into a bound document.
///
/// When the binding carries a dedup cache, a document already cached under
/// the record's id is returned instead of a new instance, and new instances
/// are cached.
pub fn materialize(binding: &Binding, schema: &Arc<Schema>, record: RawDoc) -> OdmResult<Document> {
    let id = record.get(ID_FIELD).and_then(Raw::as_id);
    if let Some(doc) = id.and_then(|id| cached(binding, schema, id)) {
        return Ok(doc);
    }
    let doc = from_storage(schema, record, &[])?;
    doc.bind(binding.clone());
    if let (Some(id), Some(cache)) = (id, &binding.cache) {
        if let Some(((name, evicted), _)) = cache
            .borrow_mut()
            .insert(cache_key(schema, id), doc.clone())
        {
            debug!(schema = %name, id = %evicted, "reference cache eviction");
        }
    }
    Ok(doc)
}

fn resolve_one(binding: &Binding, schema: &Arc<Schema>, id: ObjectId) -> Pending<'static, Option<Document>> {
    if let Some(doc) = cached(binding, schema, id) {
        debug!(schema = schema.name(), %id, "reference cache hit");
        return Pending::ready(Some(doc));
    }
    let collection = match schema.collection() {
        Ok(collection) => collection.to_string(),
        Err(e) => return Pending::fail(e),
    };
    debug!(schema = schema.name(), %id, "resolving reference");
    let pending = binding
        .backend
        .find_one(collection, Criteria::id(id), Projection::All);
    let (binding, schema) = (binding.clone(), Arc::clone(schema));
    pending.map(move |record| {
        record
            .map(|record| materialize(&binding, &schema, record))
            .transpose()
    })
}

fn check_target(target: &Schema, doc: &Document) -> OdmResult<ObjectId> {
    if doc.schema().name() != target.name() {
        return Err(OdmError::type_mismatch(target.name(), doc.schema().name()));
    }
    doc.id().ok_or_else(|| {
        OdmError::Value(format!(
            "{} document has no id and cannot be referenced; save it first",
            target.name()
        ))
    })
}

// -- Reference ---------------------------------------------------------------

struct RefInner {
    target: Arc<Schema>,
    id: ObjectId,
    resolved: RefCell<Option<Document>>,
    anchor: Anchor,
}

/// Single-document reference field value.
#[derive(Clone)]
pub struct Reference {
    inner: Rc<RefInner>,
}

impl Reference {
    pub fn new(target: Arc<Schema>, id: ObjectId) -> Self {
        Self::build(target, id, None)
    }

    /// A reference to a document that is already at hand. The document must
    /// be of the target schema and have an id.
    pub fn to_document(target: Arc<Schema>, doc: &Document) -> OdmResult<Self> {
        let id = check_target(&target, doc)?;
        Ok(Self::build(target, id, Some(doc.clone())))
    }

    fn build(target: Arc<Schema>, id: ObjectId, resolved: Option<Document>) -> Self {
        Self {
            inner: Rc::new(RefInner {
                target,
                id,
                resolved: RefCell::new(resolved),
                anchor: Anchor::default(),
            }),
        }
    }

    /// Fresh handle to the same target, keeping a resolved document.
    pub(crate) fn duplicate(&self) -> Self {
        Self::build(
            Arc::clone(&self.inner.target),
            self.inner.id,
            self.inner.resolved.borrow().clone(),
        )
    }

    pub fn id(&self) -> ObjectId {
        self.inner.id
    }

    pub fn target(&self) -> &Arc<Schema> {
        &self.inner.target
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.resolved.borrow().is_some()
    }

    pub(crate) fn attach(&self, parent: &Document, name: &str) {
        self.inner.anchor.set(parent, name);
    }

    pub(crate) fn detach(&self) {
        self.inner.anchor.clear();
    }

    /// The target document, fetched on first use and memoized.
    ///
    /// Fails with [`OdmError::BrokenReference`] when the target is gone and
    /// with [`OdmError::NotBindingToDatabase`] when the holder is unbound.
    pub fn get(&self) -> Pending<'static, Document> {
        let schema = self.inner.target.name().to_string();
        let id = self.inner.id;
        self.lookup()
            .map(move |doc| doc.ok_or(OdmError::BrokenReference { schema, id }))
    }

    /// Like [`Reference::get`], with a missing target as `None`.
    pub fn lookup(&self) -> Pending<'static, Option<Document>> {
        let memo = self.inner.resolved.borrow().clone();
        if let Some(doc) = memo {
            return Pending::ready(Some(doc));
        }
        let Some(binding) = self.inner.anchor.binding() else {
            return Pending::fail(OdmError::NotBindingToDatabase);
        };
        let this = self.clone();
        resolve_one(&binding, &self.inner.target, self.inner.id).map(move |doc| {
            if let Some(doc) = &doc {
                *this.inner.resolved.borrow_mut() = Some(doc.clone());
            }
            Ok(doc)
        })
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Reference({} {}{})",
            self.inner.target.name(),
            self.inner.id.short_hex(),
            if self.is_resolved() { ", resolved" } else { "" }
        )
    }
}

// -- ReferenceList -----------------------------------------------------------

struct RefListInner {
    target: Arc<Schema>,
    ids: RefCell<Vec<ObjectId>>,
    docs: RefCell<Option<Vec<Document>>>,
    anchor: Anchor,
}

/// List-of-references field value.
///
/// Starts unresolved when it holds ids: only `len`, `is_empty` and `ids` are
/// available until [`ReferenceList::resolve`] has run. An empty list, or one
/// built from documents, starts resolved.
#[derive(Clone)]
pub struct ReferenceList {
    inner: Rc<RefListInner>,
}

impl ReferenceList {
    pub fn new(target: Arc<Schema>, ids: Vec<ObjectId>) -> Self {
        let docs = ids.is_empty().then(Vec::new);
        Self::build(target, ids, docs)
    }

    /// A resolved list over documents at hand. Each must be of the target
    /// schema and have an id.
    pub fn from_documents(target: Arc<Schema>, docs: Vec<Document>) -> OdmResult<Self> {
        let ids = docs
            .iter()
            .map(|doc| check_target(&target, doc))
            .collect::<OdmResult<Vec<_>>>()?;
        Ok(Self::build(target, ids, Some(docs)))
    }

    fn build(target: Arc<Schema>, ids: Vec<ObjectId>, docs: Option<Vec<Document>>) -> Self {
        Self {
            inner: Rc::new(RefListInner {
                target,
                ids: RefCell::new(ids),
                docs: RefCell::new(docs),
                anchor: Anchor::default(),
            }),
        }
    }

    /// Fresh handle over the same ids, keeping resolved documents.
    pub(crate) fn duplicate(&self) -> Self {
        Self::build(
            Arc::clone(&self.inner.target),
            self.ids(),
            self.inner.docs.borrow().clone(),
        )
    }

    pub fn target(&self) -> &Arc<Schema> {
        &self.inner.target
    }

    pub fn ids(&self) -> Vec<ObjectId> {
        self.inner.ids.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.ids.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.ids.borrow().is_empty()
    }

    pub fn is_resolved(&self) -> bool {
        self.inner.docs.borrow().is_some()
    }

    pub(crate) fn attach(&self, parent: &Document, name: &str) {
        self.inner.anchor.set(parent, name);
    }

    pub(crate) fn detach(&self) {
        self.inner.anchor.clear();
    }

    /// Fetch every target in one batched query.
    ///
    /// Targets keep the order of the stored ids; ids with no stored document
    /// are dropped. Fails with [`OdmError::AlreadyResolved`] on a second call.
    pub fn resolve(&self) -> Pending<'static, ()> {
        if self.is_resolved() {
            return Pending::fail(OdmError::AlreadyResolved);
        }
        let Some(binding) = self.inner.anchor.binding() else {
            return Pending::fail(OdmError::NotBindingToDatabase);
        };
        let schema = Arc::clone(&self.inner.target);
        let collection = match schema.collection() {
            Ok(collection) => collection.to_string(),
            Err(e) => return Pending::fail(e),
        };
        let ids = self.ids();
        debug!(schema = schema.name(), count = ids.len(), "resolving reference list");
        let pending = binding
            .backend
            .find(collection, Criteria::id_in(&ids), Projection::All);
        let this = self.clone();
        pending.map(move |records| {
            let by_id: HashMap<ObjectId, RawDoc> = records
                .into_iter()
                .filter_map(|record| Some((record.get(ID_FIELD)?.as_id()?, record)))
                .collect();
            let mut docs = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(doc) = cached(&binding, &schema, *id) {
                    docs.push(doc);
                } else if let Some(record) = by_id.get(id) {
                    docs.push(materialize(&binding, &schema, record.clone())?);
                } else {
                    debug!(schema = schema.name(), %id, "dropping dangling reference");
                }
            }
            *this.inner.ids.borrow_mut() = docs.iter().filter_map(Document::id).collect();
            *this.inner.docs.borrow_mut() = Some(docs);
            Ok(())
        })
    }

    fn with_docs<R>(&self, f: impl FnOnce(&[Document]) -> OdmResult<R>) -> OdmResult<R> {
        let docs = self.inner.docs.borrow();
        let docs = docs.as_ref().ok_or(OdmError::NotResolved)?;
        f(docs)
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut Vec<Document>) -> OdmResult<R>) -> OdmResult<R> {
        let out = {
            let mut docs = self.inner.docs.borrow_mut();
            let docs = docs.as_mut().ok_or(OdmError::NotResolved)?;
            let out = f(docs)?;
            *self.inner.ids.borrow_mut() = docs.iter().filter_map(Document::id).collect();
            out
        };
        self.inner.anchor.touched(Value::ReferenceList(self.clone()));
        Ok(out)
    }

    pub fn get(&self, index: usize) -> OdmResult<Document> {
        self.with_docs(|docs| {
            docs.get(index).cloned().ok_or(OdmError::IndexOutOfRange {
                index,
                len: docs.len(),
            })
        })
    }

    pub fn to_vec(&self) -> OdmResult<Vec<Document>> {
        self.with_docs(|docs| Ok(docs.to_vec()))
    }

    /// Iterate over a snapshot of the resolved targets.
    pub fn iter(&self) -> OdmResult<std::vec::IntoIter<Document>> {
        Ok(self.to_vec()?.into_iter())
    }

    pub fn set(&self, index: usize, doc: &Document) -> OdmResult<()> {
        check_target(&self.inner.target, doc)?;
        self.mutate(|docs| {
            let len = docs.len();
            let slot = docs
                .get_mut(index)
                .ok_or(OdmError::IndexOutOfRange { index, len })?;
            *slot = doc.clone();
            Ok(())
        })
    }

    pub fn insert(&self, index: usize, doc: &Document) -> OdmResult<()> {
        check_target(&self.inner.target, doc)?;
        self.mutate(|docs| {
            if index > docs.len() {
                return Err(OdmError::IndexOutOfRange {
                    index,
                    len: docs.len(),
                });
            }
            docs.insert(index, doc.clone());
            Ok(())
        })
    }

    pub fn append(&self, doc: &Document) -> OdmResult<()> {
        check_target(&self.inner.target, doc)?;
        self.mutate(|docs| {
            docs.push(doc.clone());
            Ok(())
        })
    }

    pub fn pop(&self) -> OdmResult<Option<Document>> {
        self.mutate(|docs| Ok(docs.pop()))
    }

    pub fn remove_at(&self, index: usize) -> OdmResult<Document> {
        self.mutate(|docs| {
            if index >= docs.len() {
                return Err(OdmError::IndexOutOfRange {
                    index,
                    len: docs.len(),
                });
            }
            Ok(docs.remove(index))
        })
    }

    pub fn clear(&self) -> OdmResult<()> {
        self.mutate(|docs| {
            docs.clear();
            Ok(())
        })
    }
}

impl fmt::Debug for ReferenceList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ReferenceList({}, {} ids{})",
            self.inner.target.name(),
            self.len(),
            if self.is_resolved() { ", resolved" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Backend;
    use crate::cache::ReferenceCache;
    use crate::codec::{IntCodec, ReferenceCodec, ReferenceListCodec, StrCodec};
    use crate::schema::SchemaBuilder;
    use docmap_store::{Collaborator, InMemoryStore};
    use docmap_types::raw_doc;
    use serde_json::json;

    struct Fixture {
        store: Arc<InMemoryStore>,
        author: Arc<Schema>,
        post: Arc<Schema>,
        authors: Vec<ObjectId>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryStore::new());
        let author = SchemaBuilder::document("Author", "authors")
            .field("name", StrCodec::new())
            .build();
        let post = SchemaBuilder::document("Post", "posts")
            .field("n", IntCodec::new())
            .field("author", ReferenceCodec::new(author.clone()))
            .field("reviewers", ReferenceListCodec::new(author.clone()))
            .build();
        let authors = ["ann", "bob", "cid"]
            .iter()
            .map(|name| {
                Collaborator::insert_one(
                    store.as_ref(),
                    "authors",
                    raw_doc(json!({ "name": name })).unwrap(),
                )
                .unwrap()
            })
            .collect();
        Fixture {
            store,
            author,
            post,
            authors,
        }
    }

    fn load_post(f: &Fixture, record: RawDoc, cache: &Rc<RefCell<ReferenceCache>>) -> Document {
        let doc = from_storage(&f.post, record, &[]).unwrap();
        doc.bind(Binding::new(Backend::Blocking(f.store.clone())).with_cache(cache.clone()));
        doc
    }

    fn post_record(author: ObjectId, reviewers: &[ObjectId]) -> RawDoc {
        let mut record = RawDoc::new();
        record.insert("_id".into(), Raw::Id(ObjectId::new()));
        record.insert("author".into(), Raw::Id(author));
        record.insert(
            "reviewers".into(),
            Raw::List(reviewers.iter().copied().map(Raw::Id).collect()),
        );
        record
    }

    #[test]
    fn references_to_the_same_id_share_one_instance() {
        let f = fixture();
        let cache = Rc::new(RefCell::new(ReferenceCache::new(16)));
        let a = load_post(&f, post_record(f.authors[0], &[]), &cache);
        let b = load_post(&f, post_record(f.authors[0], &[]), &cache);

        let before = f.store.stats().find;
        let ra = a.get("author").unwrap().as_reference().unwrap().get().wait().unwrap();
        let rb = b.get("author").unwrap().as_reference().unwrap().get().wait().unwrap();
        assert!(ra.ptr_eq(&rb));
        assert_eq!(f.store.stats().find - before, 1);
        assert_eq!(ra.get("name").unwrap(), Value::from("ann"));
        assert!(ra.is_bound());
    }

    #[test]
    fn get_is_memoized_per_reference() {
        let f = fixture();
        let cache = Rc::new(RefCell::new(ReferenceCache::new(0)));
        let post = load_post(&f, post_record(f.authors[1], &[]), &cache);
        let reference = post.get("author").unwrap().as_reference().unwrap().clone();
        let first = reference.get().wait().unwrap();
        let second = reference.get().wait().unwrap();
        assert!(first.ptr_eq(&second));
        assert!(reference.is_resolved());
    }

    #[test]
    fn dangling_reference_is_broken() {
        let f = fixture();
        let cache = Rc::new(RefCell::new(ReferenceCache::new(4)));
        let post = load_post(&f, post_record(ObjectId::new(), &[]), &cache);
        let reference = post.get("author").unwrap().as_reference().unwrap().clone();
        assert!(matches!(
            reference.get().wait(),
            Err(OdmError::BrokenReference { .. })
        ));
        assert!(reference.lookup().wait().unwrap().is_none());
    }

    #[test]
    fn unbound_reference_cannot_be_followed() {
        let f = fixture();
        let post = from_storage(&f.post, post_record(f.authors[0], &[]), &[]).unwrap();
        let reference = post.get("author").unwrap().as_reference().unwrap().clone();
        assert!(matches!(
            reference.get().wait(),
            Err(OdmError::NotBindingToDatabase)
        ));
    }

    #[test]
    fn reference_list_state_machine() {
        let f = fixture();
        let cache = Rc::new(RefCell::new(ReferenceCache::new(16)));
        let reviewers = [f.authors[2], ObjectId::new(), f.authors[0]];
        let post = load_post(&f, post_record(f.authors[0], &reviewers), &cache);
        let list = post.get("reviewers").unwrap().as_reference_list().unwrap().clone();

        assert_eq!(list.len(), 3);
        assert!(matches!(list.get(0), Err(OdmError::NotResolved)));
        assert!(matches!(list.pop(), Err(OdmError::NotResolved)));

        let before = f.store.stats().find;
        list.resolve().wait().unwrap();
        assert_eq!(f.store.stats().find - before, 1);

        let names: Vec<Value> = list
            .to_vec()
            .unwrap()
            .iter()
            .map(|d| d.get("name").unwrap())
            .collect();
        assert_eq!(names, vec![Value::from("cid"), Value::from("ann")]);
        assert_eq!(list.ids(), vec![f.authors[2], f.authors[0]]);
        assert!(matches!(list.resolve().wait(), Err(OdmError::AlreadyResolved)));
    }

    #[test]
    fn mutating_a_resolved_list_marks_the_field() {
        let f = fixture();
        let cache = Rc::new(RefCell::new(ReferenceCache::new(16)));
        let post = load_post(&f, post_record(f.authors[0], &[f.authors[0]]), &cache);
        let list = post.get("reviewers").unwrap().as_reference_list().unwrap().clone();
        list.resolve().wait().unwrap();

        let ann = post.get("author").unwrap().as_reference().unwrap().get().wait().unwrap();
        list.append(&ann).unwrap();
        assert_eq!(post.changed_fields(), vec!["reviewers"]);
        assert_eq!(
            post.save_ops().unwrap(),
            vec![docmap_store::UpdateOp::Set(
                "reviewers".into(),
                Raw::List(vec![Raw::Id(f.authors[0]), Raw::Id(f.authors[0])]),
            )]
        );
    }

    #[test]
    fn empty_list_starts_resolved() {
        let f = fixture();
        let list = ReferenceList::new(f.author.clone(), Vec::new());
        assert!(list.is_resolved());
        assert!(list.to_vec().unwrap().is_empty());
        assert_eq!(list.iter().unwrap().count(), 0);
        assert!(matches!(list.resolve().wait(), Err(OdmError::AlreadyResolved)));
    }

    #[test]
    fn unsaved_documents_cannot_be_referenced() {
        let f = fixture();
        let fresh = Document::new(f.author.clone());
        assert!(matches!(
            Reference::to_document(f.author.clone(), &fresh),
            Err(OdmError::Value(_))
        ));
        let list = ReferenceList::new(f.author.clone(), Vec::new());
        assert!(matches!(list.append(&fresh), Err(OdmError::Value(_))));
    }

    #[tokio::test]
    async fn suspending_resolution() {
        let f = fixture();
        let cache = Rc::new(RefCell::new(ReferenceCache::new(16)));
        let post = from_storage(&f.post, post_record(f.authors[1], &f.authors), &[]).unwrap();
        post.bind(Binding::new(Backend::Suspending(f.store.clone())).with_cache(cache));

        let reference = post.get("author").unwrap().as_reference().unwrap().clone();
        let pending = reference.get();
        assert!(!pending.is_ready());
        let bob = pending.await.unwrap();
        assert_eq!(bob.get("name").unwrap(), Value::from("bob"));

        let list = post.get("reviewers").unwrap().as_reference_list().unwrap().clone();
        list.resolve().await.unwrap();
        assert_eq!(list.len(), 3);
        assert!(list.get(1).unwrap().ptr_eq(&bob));
    }
}

//! The per-document value store.
//!
//! Every document keeps three tiers of field state:
//!
//! - `raw`: storable values (or the not-loaded marker) as read from storage
//! - `cache`: decoded values, filled lazily on first read and on every write
//! - `changed`: values written since the last save, insert or reload
//!
//! A read consults `changed`, then `cache`, then decodes from `raw`, then
//! falls back to the codec default. Save diffs are computed from `changed`.
//!
//! Nested items (embedded documents, containers, references) hang under a
//! parent through an [`Anchor`], a weak back-link plus the field name. The
//! anchor yields dotted paths and the root document; it never keeps the
//! parent alive.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use docmap_store::UpdateOp;
use docmap_types::{path, ObjectId, Raw, RawDoc};
use tracing::debug;

use crate::binding::Binding;
use crate::codec::Codec;
use crate::error::{OdmError, OdmResult};
use crate::log::{ChangeLog, LogEntry};
use crate::markers::{FieldState, Slot};
use crate::schema::{Schema, ID_FIELD};
use crate::value::Value;

struct Link {
    parent: Weak<DocInner>,
    name: String,
    /// The item sits inside the container stored under `name`.
    item: bool,
}

/// Non-owning link from a nested item to the document field holding it.
#[derive(Default)]
pub(crate) struct Anchor(RefCell<Option<Link>>);

impl Anchor {
    pub(crate) fn set(&self, parent: &Document, name: &str) {
        self.link(parent, name, false);
    }

    fn link(&self, parent: &Document, name: &str, item: bool) {
        *self.0.borrow_mut() = Some(Link {
            parent: Rc::downgrade(&parent.inner),
            name: name.to_string(),
            item,
        });
    }

    pub(crate) fn clear(&self) {
        *self.0.borrow_mut() = None;
    }

    fn is_item(&self) -> bool {
        self.0.borrow().as_ref().is_some_and(|link| link.item)
    }

    /// Live parent and the field name under it.
    pub(crate) fn get(&self) -> Option<(Document, String)> {
        let link = self.0.borrow();
        let link = link.as_ref()?;
        let inner = link.parent.upgrade()?;
        Some((Document { inner }, link.name.clone()))
    }

    /// Dotted path from the root, if attached.
    pub(crate) fn path(&self) -> Option<String> {
        self.get()
            .map(|(parent, name)| path::join(&parent.path(), &name))
    }

    pub(crate) fn binding(&self) -> Option<Binding> {
        self.get().and_then(|(parent, _)| parent.binding())
    }

    /// Mark the holding field as wholly changed and log the mutation on the
    /// root. Detached items only change locally.
    pub(crate) fn touched(&self, value: Value) {
        let Some((parent, name)) = self.get() else {
            return;
        };
        parent.child_changed(&name, value.clone(), true);
        parent.root().push_log(LogEntry::ChangeChild {
            path: path::join(&parent.path(), &name),
            name: name.clone(),
            entry: Box::new(LogEntry::SetField { name, value }),
        });
    }

    /// Link an item stored inside the container at this anchor. Embedded
    /// documents report their writes as a change of the whole container
    /// field; references reach the owner's binding.
    pub(crate) fn adopt(&self, item: &Value) {
        let Some((parent, name)) = self.get() else {
            return;
        };
        match item {
            Value::Reference(reference) => reference.attach(&parent, &name),
            Value::Document(doc) => doc.inner.anchor.link(&parent, &name, true),
            _ => {}
        }
    }

    /// Unlink an item taken out of the container at this anchor.
    pub(crate) fn release(&self, item: &Value) {
        if let Value::Document(doc) = item {
            if doc.inner.anchor.is_item() {
                doc.detach();
            }
        }
    }
}

struct DocInner {
    schema: Arc<Schema>,
    state: RefCell<DocState>,
    anchor: Anchor,
}

#[derive(Default)]
struct DocState {
    raw: BTreeMap<String, Slot>,
    cache: BTreeMap<String, Value>,
    changed: BTreeMap<String, Value>,
    deleted: BTreeSet<String>,
    /// Changed embedded fields whose own fields were written, as opposed to
    /// being replaced wholesale. Saved as dotted sub-paths.
    nested: BTreeSet<String>,
    /// Not-loaded paths inside partially loaded embedded fields, relative to
    /// the field. Reapplied whenever the field is decoded from `raw`.
    partial: BTreeMap<String, Vec<String>>,
    log: ChangeLog,
    binding: Option<Binding>,
}

/// Handle to a document instance. Clones share identity.
#[derive(Clone)]
pub struct Document {
    inner: Rc<DocInner>,
}

impl Document {
    /// A new, empty, unsaved document.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            inner: Rc::new(DocInner {
                schema,
                state: RefCell::new(DocState::default()),
                anchor: Anchor::default(),
            }),
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    /// Whether both handles refer to the same instance.
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn state(&self) -> Ref<'_, DocState> {
        self.inner.state.borrow()
    }

    fn state_mut(&self) -> RefMut<'_, DocState> {
        self.inner.state.borrow_mut()
    }

    // -- Tree navigation ---------------------------------------------------

    pub fn parent(&self) -> Option<Document> {
        self.inner.anchor.get().map(|(parent, _)| parent)
    }

    /// Field name under the parent document.
    pub fn field_name(&self) -> Option<String> {
        self.inner.anchor.get().map(|(_, name)| name)
    }

    /// Dotted path from the root. Empty for a root document.
    pub fn path(&self) -> String {
        self.inner.anchor.path().unwrap_or_default()
    }

    /// The outermost document, or `self` when detached.
    pub fn root(&self) -> Document {
        let mut current = self.clone();
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    pub fn is_root(&self) -> bool {
        self.parent().is_none()
    }

    /// Whether this document, or one of its ancestors, is an item of a list,
    /// set or map. Such documents have no path of their own in storage.
    pub fn in_container(&self) -> bool {
        let mut current = self.clone();
        loop {
            if current.inner.anchor.is_item() {
                return true;
            }
            match current.parent() {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    pub(crate) fn set_parent(&self, parent: &Document, name: &str) {
        self.inner.anchor.set(parent, name);
    }

    pub(crate) fn detach(&self) {
        self.inner.anchor.clear();
    }

    // -- Binding and log ---------------------------------------------------

    /// Attach a storage binding. Only meaningful on root documents.
    pub fn bind(&self, binding: Binding) {
        self.state_mut().binding = Some(binding);
    }

    /// Binding of the root document.
    pub fn binding(&self) -> Option<Binding> {
        self.root().state().binding.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.binding().is_some()
    }

    /// Snapshot of the root document's change log.
    pub fn log(&self) -> ChangeLog {
        self.root().state().log.clone()
    }

    /// Append an event to the root document's change log.
    pub fn log_event(&self, entry: LogEntry) {
        self.root().push_log(entry);
    }

    fn push_log(&self, entry: LogEntry) {
        self.state_mut().log.push(entry);
    }

    fn record(&self, entry: LogEntry) {
        if self.is_root() {
            self.push_log(entry);
            return;
        }
        let name = entry.field_name().unwrap_or_default().to_string();
        self.root().push_log(LogEntry::ChangeChild {
            path: self.path(),
            name,
            entry: Box::new(entry),
        });
    }

    // -- Reads -------------------------------------------------------------

    /// Current value of `name`.
    ///
    /// Fails with [`OdmError::NotLoaded`] for a field excluded by the load
    /// projection and with [`OdmError::AttributeNotSet`] for a field with no
    /// value and no default (unless the schema enables smart null).
    pub fn get(&self, name: &str) -> OdmResult<Value> {
        match self.peek(name)? {
            FieldState::Set(value) => Ok(value),
            FieldState::NotLoaded => Err(OdmError::NotLoaded(self.qualified(name))),
            FieldState::NotSet if self.schema().smart_null() => Ok(Value::Null),
            FieldState::NotSet => Err(OdmError::AttributeNotSet(self.qualified(name))),
        }
    }

    /// Current state of `name` without turning markers into errors.
    pub fn peek(&self, name: &str) -> OdmResult<FieldState> {
        let codec = Arc::clone(self.schema().codec(name)?);
        let (slot, partial) = {
            let state = self.state();
            if let Some(value) = state.changed.get(name).or_else(|| state.cache.get(name)) {
                return Ok(FieldState::Set(value.clone()));
            }
            (state.raw.get(name).cloned(), state.partial.get(name).cloned())
        };
        let value = match (slot, partial) {
            (Some(Slot::NotLoaded), _) => return Ok(FieldState::NotLoaded),
            (Some(Slot::Loaded(raw)), Some(rest)) => decode_partial(&*codec, raw, &rest)?,
            (Some(Slot::Loaded(raw)), None) => codec.decode(&raw)?,
            (None, _) => match codec.default_value() {
                Some(value) => value,
                None => return Ok(FieldState::NotSet),
            },
        };
        value.attach(self, name);
        self.state_mut()
            .cache
            .insert(name.to_string(), value.clone());
        Ok(FieldState::Set(value))
    }

    /// Read through embedded documents along a dotted path.
    pub fn get_path(&self, dotted: &str) -> OdmResult<Value> {
        let (head, rest) = path::split_first(dotted);
        let value = self.get(head)?;
        match (rest, value) {
            (None, value) => Ok(value),
            (Some(rest), Value::Document(child)) => child.get_path(rest),
            (Some(_), other) => Err(OdmError::type_mismatch("document", other.type_name())),
        }
    }

    /// Identifier of a root document, if it has one. Never decodes or caches.
    pub fn id(&self) -> Option<ObjectId> {
        let state = self.state();
        if let Some(value) = state.changed.get(ID_FIELD).or_else(|| state.cache.get(ID_FIELD)) {
            return value.as_id();
        }
        match state.raw.get(ID_FIELD) {
            Some(Slot::Loaded(Raw::Id(id))) => Some(*id),
            _ => None,
        }
    }

    fn qualified(&self, name: &str) -> String {
        path::join(&self.path(), name)
    }

    // -- Writes ------------------------------------------------------------

    /// Assign `name`. The value goes through the field codec's `normalize`.
    pub fn set(&self, name: &str, value: impl Into<Value>) -> OdmResult<()> {
        let value = self.schema().codec(name)?.normalize(value.into())?;
        let previous = {
            let mut state = self.state_mut();
            state.changed.insert(name.to_string(), value.clone());
            state.deleted.remove(name);
            state.nested.remove(name);
            state.cache.insert(name.to_string(), value.clone())
        };
        if let Some(previous) = previous {
            previous.detach();
        }
        value.attach(self, name);
        self.record(LogEntry::SetField {
            name: name.to_string(),
            value,
        });
        self.propagate();
        Ok(())
    }

    /// Remove `name` from every tier. The next save unsets it in storage.
    pub fn delete(&self, name: &str) -> OdmResult<()> {
        self.schema().codec(name)?;
        let previous = {
            let mut state = self.state_mut();
            state.changed.remove(name);
            state.raw.remove(name);
            state.partial.remove(name);
            state.nested.remove(name);
            state.deleted.insert(name.to_string());
            state.cache.remove(name)
        };
        if let Some(previous) = previous {
            previous.detach();
        }
        self.record(LogEntry::UnsetField {
            name: name.to_string(),
        });
        self.propagate();
        Ok(())
    }

    /// Drop the decoded value of `name` so the next read decodes `raw` again.
    /// Pending changes are kept.
    pub fn invalidate(&self, name: &str) {
        let previous = self.state_mut().cache.remove(name);
        if let Some(previous) = previous {
            if !self.state().changed.contains_key(name) {
                previous.detach();
            }
        }
    }

    /// A nested item under `name` changed. `whole` replaces the field in the
    /// diff; otherwise an embedded document contributes dotted sub-paths.
    pub(crate) fn child_changed(&self, name: &str, value: Value, whole: bool) {
        {
            let mut state = self.state_mut();
            if whole {
                state.nested.remove(name);
            } else if !state.changed.contains_key(name) {
                state.nested.insert(name.to_string());
            }
            state.cache.insert(name.to_string(), value.clone());
            state.changed.insert(name.to_string(), value);
        }
        self.propagate();
    }

    fn propagate(&self) {
        let Some((parent, name)) = self.inner.anchor.get() else {
            return;
        };
        if !self.inner.anchor.is_item() {
            parent.child_changed(&name, Value::Document(self.clone()), false);
            return;
        }
        let container = {
            let state = parent.state();
            state.changed.get(&name).or_else(|| state.cache.get(&name)).cloned()
        };
        if let Some(container) = container {
            parent.child_changed(&name, container, true);
        }
    }

    // -- Introspection -----------------------------------------------------

    /// Names written since the last save, insert or reload.
    pub fn changed_fields(&self) -> Vec<String> {
        self.state().changed.keys().cloned().collect()
    }

    pub fn changed_values(&self) -> BTreeMap<String, Value> {
        self.state().changed.clone()
    }

    /// Names deleted since the last save.
    pub fn deleted_fields(&self) -> Vec<String> {
        self.state().deleted.iter().cloned().collect()
    }

    pub fn is_changed(&self) -> bool {
        let state = self.state();
        !state.changed.is_empty() || !state.deleted.is_empty()
    }

    pub fn cache_snapshot(&self) -> BTreeMap<String, Value> {
        self.state().cache.clone()
    }

    /// Names present in the raw tier, loaded or not.
    pub fn raw_names(&self) -> Vec<String> {
        self.state().raw.keys().cloned().collect()
    }

    /// Fields excluded by the projection this document was loaded with.
    pub fn not_loaded_fields(&self) -> Vec<String> {
        self.state()
            .raw
            .iter()
            .filter(|(_, slot)| slot.is_not_loaded())
            .map(|(name, _)| name.clone())
            .collect()
    }

    // -- Persistence support -----------------------------------------------

    /// Update operations that bring storage in line with this document.
    ///
    /// One `Set` per changed field, in schema order, followed by one `Unset`
    /// per deleted field. Embedded documents changed only through their own
    /// fields contribute dotted sub-path operations instead of a full `Set`.
    pub fn save_ops(&self) -> OdmResult<Vec<UpdateOp>> {
        self.save_ops_at("")
    }

    fn save_ops_at(&self, prefix: &str) -> OdmResult<Vec<UpdateOp>> {
        let state = self.state();
        let mut ops = Vec::new();
        for (name, codec) in self.schema().fields() {
            let Some(value) = state.changed.get(name) else {
                continue;
            };
            let target = path::join(prefix, name);
            match value {
                Value::Document(child) if state.nested.contains(name) => {
                    ops.extend(child.save_ops_at(&target)?);
                }
                value => ops.push(UpdateOp::Set(target, codec.encode(value)?)),
            }
        }
        ops.extend(
            state
                .deleted
                .iter()
                .map(|name| UpdateOp::Unset(path::join(prefix, name))),
        );
        Ok(ops)
    }

    /// Clear pending changes after a successful save, recursing into changed
    /// embedded documents.
    pub fn mark_saved(&self) {
        let children: Vec<Document> = {
            let mut state = self.state_mut();
            state.deleted.clear();
            state.nested.clear();
            std::mem::take(&mut state.changed)
                .into_values()
                .flat_map(|value| value.child_documents())
                .collect()
        };
        for child in children {
            child.mark_saved();
        }
    }

    /// Record the identifier assigned by an insert and clear pending changes.
    pub fn mark_inserted(&self, id: ObjectId) {
        {
            let mut state = self.state_mut();
            state.cache.remove(ID_FIELD);
            state.changed.remove(ID_FIELD);
            state
                .raw
                .insert(ID_FIELD.to_string(), Slot::Loaded(Raw::Id(id)));
        }
        self.mark_saved();
    }

    /// Replace the raw tier with a stored record, clearing cache and changes.
    ///
    /// Names in `not_loaded` become not-loaded markers. Dotted names are
    /// routed into embedded documents, which are built eagerly for that.
    pub fn replace_raw(&self, mut record: RawDoc, not_loaded: &[&str]) -> OdmResult<()> {
        let schema = Arc::clone(self.schema());
        let mut top = BTreeSet::new();
        let mut nested: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for dotted in not_loaded {
            match path::split_first(dotted) {
                (head, None) => {
                    top.insert(head);
                }
                (head, Some(rest)) => nested.entry(head).or_default().push(rest),
            }
        }

        let mut slots = BTreeMap::new();
        let mut partial = BTreeMap::new();
        for (name, codec) in schema.fields() {
            if top.contains(name) {
                slots.insert(name.to_string(), Slot::NotLoaded);
                continue;
            }
            let stored = record.remove(name);
            let Some(rest) = nested.get(name) else {
                if let Some(raw) = stored {
                    slots.insert(name.to_string(), Slot::Loaded(raw));
                }
                continue;
            };
            match (codec.embedded_schema(), stored) {
                (Some(_), Some(raw @ Raw::Doc(_))) => {
                    slots.insert(name.to_string(), Slot::Loaded(raw));
                    partial.insert(
                        name.to_string(),
                        rest.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
                    );
                }
                (Some(_), Some(raw)) => {
                    slots.insert(name.to_string(), Slot::Loaded(raw));
                }
                (Some(_), None) => {}
                // Only embedded documents can be partially loaded.
                (None, _) => {
                    slots.insert(name.to_string(), Slot::NotLoaded);
                }
            }
        }
        if !record.is_empty() {
            debug!(
                schema = schema.name(),
                fields = ?record.keys().collect::<Vec<_>>(),
                "ignoring stored fields unknown to the schema"
            );
        }

        let eager: Vec<String> = partial.keys().cloned().collect();
        let previous = {
            let mut state = self.state_mut();
            state.raw = slots;
            state.partial = partial;
            state.changed.clear();
            state.deleted.clear();
            state.nested.clear();
            std::mem::take(&mut state.cache)
        };
        for value in previous.into_values() {
            value.detach();
        }
        for name in eager {
            self.peek(&name)?;
        }
        Ok(())
    }
}

/// Decode a partially loaded embedded document, marking `not_loaded` inside
/// it. Other codecs decode normally.
fn decode_partial(codec: &dyn Codec, raw: Raw, not_loaded: &[String]) -> OdmResult<Value> {
    match (codec.embedded_schema(), raw) {
        (Some(sub), Raw::Doc(record)) => {
            let child = Document::new(Arc::clone(sub));
            let paths: Vec<&str> = not_loaded.iter().map(String::as_str).collect();
            child.replace_raw(record, &paths)?;
            Ok(Value::Document(child))
        }
        (_, raw) => codec.decode(&raw),
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = f.debug_struct("Document");
        out.field("schema", &self.schema().name());
        if let Ok(state) = self.inner.state.try_borrow() {
            out.field("changed", &state.changed.keys().collect::<Vec<_>>());
        }
        out.finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EmbeddedCodec, IntCodec, ListCodec, MapCodec, StaticCodec, StrCodec};
    use crate::schema::SchemaBuilder;
    use crate::serializer::{to_storage, EncodeOptions};
    use docmap_types::raw_doc;
    use serde_json::json;

    fn inner_schema() -> Arc<Schema> {
        SchemaBuilder::embedded("Inner")
            .field("x", IntCodec::new())
            .field("y", IntCodec::new())
            .build()
    }

    fn schema() -> Arc<Schema> {
        SchemaBuilder::document("Doc", "docs")
            .field("i", IntCodec::new())
            .field("s", StrCodec::new().with_default("dflt").unwrap())
            .field("e", EmbeddedCodec::new(inner_schema()))
            .field("tags", ListCodec::new(StrCodec::new()))
            .build()
    }

    fn holder() -> Arc<Schema> {
        SchemaBuilder::document("Holder", "holders")
            .field("items", ListCodec::new(EmbeddedCodec::new(inner_schema())))
            .field("by_key", MapCodec::new(EmbeddedCodec::new(inner_schema())))
            .build()
    }

    fn loaded(record: serde_json::Value, not_loaded: &[&str]) -> Document {
        let doc = Document::new(schema());
        doc.replace_raw(raw_doc(record).unwrap(), not_loaded).unwrap();
        doc
    }

    #[test]
    fn write_then_read_comes_from_changed() {
        let doc = Document::new(schema());
        doc.set("i", 13).unwrap();
        assert_eq!(doc.get("i").unwrap(), Value::Int(13));
        assert_eq!(doc.changed_fields(), vec!["i"]);
        assert_eq!(doc.cache_snapshot().get("i"), Some(&Value::Int(13)));
    }

    #[test]
    fn dirty_tracking_matches_written_names() {
        let doc = loaded(json!({"i": 1, "s": "a"}), &[]);
        doc.set("s", "b").unwrap();
        doc.set("i", 2).unwrap();
        doc.set("i", 3).unwrap();
        assert_eq!(doc.changed_fields(), vec!["i", "s"]);
        assert_eq!(doc.changed_values().get("i"), Some(&Value::Int(3)));
    }

    #[test]
    fn raw_is_decoded_once_into_cache() {
        let doc = loaded(json!({"i": 5}), &[]);
        assert!(doc.cache_snapshot().is_empty());
        assert_eq!(doc.get("i").unwrap(), Value::Int(5));
        assert_eq!(doc.cache_snapshot().len(), 1);
        assert!(!doc.is_changed());
    }

    #[test]
    fn default_is_cached_but_not_changed() {
        let doc = Document::new(schema());
        assert_eq!(doc.get("s").unwrap(), Value::from("dflt"));
        assert!(doc.cache_snapshot().contains_key("s"));
        assert!(!doc.is_changed());
    }

    #[test]
    fn missing_without_default_is_not_set() {
        let doc = Document::new(schema());
        assert!(matches!(doc.get("i"), Err(OdmError::AttributeNotSet(f)) if f == "i"));
        assert_eq!(doc.peek("i").unwrap(), FieldState::NotSet);
    }

    #[test]
    fn smart_null_reads_missing_as_null() {
        let schema = SchemaBuilder::document("Lenient", "l")
            .field("i", IntCodec::new())
            .smart_null(true)
            .build();
        let doc = Document::new(schema);
        assert_eq!(doc.get("i").unwrap(), Value::Null);
        assert_eq!(doc.peek("i").unwrap(), FieldState::NotSet);
    }

    #[test]
    fn unknown_field_is_rejected() {
        let doc = Document::new(schema());
        assert!(matches!(doc.get("zz"), Err(OdmError::UnknownField { .. })));
        assert!(matches!(doc.set("zz", 1), Err(OdmError::UnknownField { .. })));
    }

    #[test]
    fn not_loaded_read_fails_until_replaced() {
        let doc = loaded(json!({"s": "a"}), &["i"]);
        assert!(matches!(doc.get("i"), Err(OdmError::NotLoaded(f)) if f == "i"));
        assert_eq!(doc.not_loaded_fields(), vec!["i"]);
        doc.replace_raw(raw_doc(json!({"i": 4, "s": "a"})).unwrap(), &[])
            .unwrap();
        assert_eq!(doc.get("i").unwrap(), Value::Int(4));
    }

    #[test]
    fn writing_a_not_loaded_field_is_allowed() {
        let doc = loaded(json!({}), &["i"]);
        doc.set("i", 1).unwrap();
        assert_eq!(doc.get("i").unwrap(), Value::Int(1));
    }

    #[test]
    fn type_and_value_errors_leave_state_untouched() {
        let schema = SchemaBuilder::document("Bounded", "b")
            .field("i", IntCodec::new().max(3))
            .build();
        let doc = Document::new(schema);
        assert!(matches!(doc.set("i", "x"), Err(OdmError::Type { .. })));
        assert!(matches!(doc.set("i", 4), Err(OdmError::Value(_))));
        assert!(!doc.is_changed());
        assert!(doc.log().is_empty());
    }

    #[test]
    fn static_field_assignment_is_a_protocol_error() {
        let schema = SchemaBuilder::document("S", "s")
            .field("kind", StaticCodec::new("k"))
            .build();
        let doc = Document::new(schema);
        assert_eq!(doc.get("kind").unwrap(), Value::from("k"));
        assert!(matches!(doc.set("kind", "k"), Err(OdmError::Protocol(_))));
    }

    #[test]
    fn delete_is_saved_as_unset() {
        let doc = loaded(json!({"i": 1}), &[]);
        doc.delete("i").unwrap();
        assert!(matches!(doc.get("i"), Err(OdmError::AttributeNotSet(_))));
        assert_eq!(doc.save_ops().unwrap(), vec![UpdateOp::Unset("i".into())]);
        assert_eq!(doc.log().kinds(), vec!["unset_field"]);
    }

    #[test]
    fn save_ops_follow_changed() {
        let doc = loaded(json!({"i": 1, "s": "a"}), &[]);
        doc.set("i", 2).unwrap();
        assert_eq!(
            doc.save_ops().unwrap(),
            vec![UpdateOp::Set("i".into(), Raw::Int(2))]
        );
        doc.mark_saved();
        assert!(!doc.is_changed());
        assert!(doc.save_ops().unwrap().is_empty());
        assert_eq!(doc.get("i").unwrap(), Value::Int(2));
    }

    #[test]
    fn nested_write_marks_parent_and_logs_on_root() {
        let doc = loaded(json!({"e": {"x": 1, "y": 2}}), &[]);
        let inner = doc.get("e").unwrap().as_document().unwrap().clone();
        assert_eq!(inner.path(), "e");
        assert!(inner.root().ptr_eq(&doc));

        inner.set("x", 5).unwrap();
        assert_eq!(doc.changed_fields(), vec!["e"]);
        assert_eq!(
            doc.save_ops().unwrap(),
            vec![UpdateOp::Set("e.x".into(), Raw::Int(5))]
        );
        let last = doc.log().last().cloned().unwrap();
        assert!(matches!(
            last,
            LogEntry::ChangeChild { ref path, ref name, .. } if path == "e" && name == "x"
        ));

        doc.mark_saved();
        assert!(!inner.is_changed());
    }

    #[test]
    fn whole_assignment_wins_over_nested_writes() {
        let doc = loaded(json!({"e": {"x": 1}}), &[]);
        let fresh = Document::new(inner_schema());
        fresh.set("x", 9).unwrap();
        doc.set("e", fresh.clone()).unwrap();
        fresh.set("y", 3).unwrap();
        let ops = doc.save_ops().unwrap();
        assert_eq!(ops.len(), 1);
        assert!(matches!(&ops[0], UpdateOp::Set(p, Raw::Doc(_)) if p == "e"));
    }

    #[test]
    fn replaced_child_no_longer_propagates() {
        let doc = loaded(json!({"e": {"x": 1}}), &[]);
        let old = doc.get("e").unwrap().as_document().unwrap().clone();
        doc.set("e", Document::new(inner_schema())).unwrap();
        doc.mark_saved();
        old.set("x", 2).unwrap();
        assert!(!doc.is_changed());
        assert!(old.is_root());
    }

    #[test]
    fn dotted_not_loaded_routes_into_embedded() {
        let doc = loaded(json!({"i": 1, "e": {"x": 1}}), &["e.y"]);
        let inner = doc.get("e").unwrap().as_document().unwrap().clone();
        assert_eq!(inner.get("x").unwrap(), Value::Int(1));
        assert!(matches!(inner.get("y"), Err(OdmError::NotLoaded(f)) if f == "e.y"));
        assert!(matches!(doc.get_path("e.y"), Err(OdmError::NotLoaded(_))));
    }

    #[test]
    fn nested_not_loaded_on_a_container_hides_the_field() {
        let doc = loaded(json!({"tags": ["a"]}), &["tags.0"]);
        assert!(matches!(doc.get("tags"), Err(OdmError::NotLoaded(_))));
    }

    #[test]
    fn mark_inserted_keeps_cache_and_sets_id() {
        let doc = Document::new(schema());
        doc.set("i", 13).unwrap();
        let id = ObjectId::new();
        doc.mark_inserted(id);
        assert_eq!(doc.id(), Some(id));
        assert!(doc.changed_fields().is_empty());
        let cache = doc.cache_snapshot();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("i"), Some(&Value::Int(13)));
    }

    #[test]
    fn invalidate_forces_a_fresh_decode() {
        let doc = loaded(json!({"e": {"x": 1}}), &[]);
        let first = doc.get("e").unwrap();
        doc.invalidate("e");
        let second = doc.get("e").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn invalidate_keeps_nested_not_loaded_markers() {
        let doc = loaded(json!({"i": 1, "e": {"x": 1}}), &["e.y"]);
        assert!(matches!(doc.get_path("e.y"), Err(OdmError::NotLoaded(_))));
        doc.invalidate("e");
        assert!(matches!(doc.get_path("e.y"), Err(OdmError::NotLoaded(f)) if f == "e.y"));
        assert_eq!(doc.get_path("e.x").unwrap(), Value::Int(1));
        assert!(matches!(
            to_storage(&doc, &EncodeOptions::default()),
            Err(OdmError::NotLoaded(_))
        ));
    }

    #[test]
    fn embedded_list_item_write_rewrites_the_list() {
        let doc = Document::new(holder());
        doc.replace_raw(raw_doc(json!({"items": [{"x": 1}]})).unwrap(), &[])
            .unwrap();
        let items = doc.get("items").unwrap().as_list().unwrap().clone();
        let item = items.get(0).unwrap().as_document().unwrap().clone();
        assert!(item.root().ptr_eq(&doc));
        assert!(item.in_container());

        item.set("x", 2).unwrap();
        assert_eq!(doc.changed_fields(), vec!["items"]);
        assert_eq!(
            doc.save_ops().unwrap(),
            vec![UpdateOp::Set(
                "items".into(),
                Raw::List(vec![Raw::Doc(raw_doc(json!({"x": 2})).unwrap())])
            )]
        );
        assert_eq!(doc.log().kinds(), vec!["change_child"]);

        doc.mark_saved();
        assert!(!item.is_changed());
    }

    #[test]
    fn appended_item_is_linked_and_removed_item_released() {
        let doc = Document::new(holder());
        doc.replace_raw(raw_doc(json!({"by_key": {"a": {"x": 1}}})).unwrap(), &[])
            .unwrap();
        let map = doc.get("by_key").unwrap().as_map().unwrap().clone();
        let fresh = Document::new(inner_schema());
        map.insert("b", fresh.clone()).unwrap();
        doc.mark_saved();

        fresh.set("x", 7).unwrap();
        assert_eq!(doc.changed_fields(), vec!["by_key"]);
        doc.mark_saved();

        let old = map.get("a").unwrap().unwrap().as_document().unwrap().clone();
        map.remove("a").unwrap();
        doc.mark_saved();
        old.set("x", 9).unwrap();
        assert!(!doc.is_changed());
        assert!(old.is_root());
    }

    #[test]
    fn unknown_stored_fields_are_ignored() {
        let doc = loaded(json!({"i": 1, "legacy": true}), &[]);
        assert_eq!(doc.raw_names(), vec!["i"]);
    }
}

//! List, set and map field values.
//!
//! Containers are shared handles. Local operations change the in-memory copy
//! and mark the owning field as changed, so the next save rewrites the whole
//! field. Direct operations (`push`, `pull`, `add_to_set`, map `set` and
//! `unset`) issue a single path-targeted update against storage first and
//! only then apply the same change locally, without marking the field.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use docmap_store::{Criteria, Projection, UpdateOp};
use docmap_types::{path, ObjectId, Raw, RawDoc};
use tracing::debug;

use crate::binding::{Binding, Pending};
use crate::codec::{item_error, Codec, KeyCoercion};
use crate::document::{Anchor, Document};
use crate::error::{OdmError, OdmResult};
use crate::log::LogEntry;
use crate::value::Value;

/// Where a direct operation lands.
struct Target {
    root: Document,
    binding: Binding,
    collection: String,
    id: ObjectId,
    path: String,
}

fn direct_target(anchor: &Anchor) -> OdmResult<Target> {
    let (parent, name) = anchor.get().ok_or_else(|| {
        OdmError::Protocol("direct operations need a container stored in a document".into())
    })?;
    if parent.in_container() {
        return Err(OdmError::Protocol(
            "direct operations are not available inside list, set or map items".into(),
        ));
    }
    let root = parent.root();
    let binding = root.binding().ok_or(OdmError::NotBindingToDatabase)?;
    let id = root.id().ok_or_else(|| {
        OdmError::Protocol("direct operations need a document that was saved first".into())
    })?;
    let collection = root.schema().collection()?.to_string();
    Ok(Target {
        path: path::join(&parent.path(), &name),
        root,
        binding,
        collection,
        id,
    })
}

/// Send one update operation for the container at `anchor`. `op` receives the
/// dotted path of the container.
fn direct_update(anchor: &Anchor, op: impl FnOnce(&str) -> UpdateOp) -> Pending<'static, ()> {
    let target = match direct_target(anchor) {
        Ok(target) => target,
        Err(e) => return Pending::fail(e),
    };
    let op = op(&target.path);
    debug!(
        collection = %target.collection,
        id = %target.id,
        op = op.name(),
        path = op.path(),
        "direct update"
    );
    let Target {
        root,
        binding,
        collection,
        id,
        ..
    } = target;
    let ops = vec![op];
    binding
        .backend
        .update_one(collection.clone(), Criteria::id(id), ops.clone())
        .map(move |result| {
            if result.matched == 0 {
                return Err(OdmError::DocumentNotFound { collection, id });
            }
            root.log_event(LogEntry::UpdateOne { ops });
            Ok(())
        })
}

/// Fetch the stored value of the container at `anchor`.
fn fetch_stored(anchor: &Anchor) -> Pending<'static, Option<Raw>> {
    let target = match direct_target(anchor) {
        Ok(target) => target,
        Err(e) => return Pending::fail(e),
    };
    let Target {
        binding,
        collection,
        id,
        path: field,
        ..
    } = target;
    binding
        .backend
        .find_one(
            collection.clone(),
            Criteria::id(id),
            Projection::include([field.clone()]),
        )
        .map(move |record| {
            let record = record.ok_or(OdmError::DocumentNotFound { collection, id })?;
            Ok(path::get(&record, &field).cloned())
        })
}

fn decode_items(codec: &Arc<dyn Codec>, stored: Option<Raw>) -> OdmResult<Vec<Value>> {
    match stored {
        None | Some(Raw::Null) => Ok(Vec::new()),
        Some(Raw::List(items)) => items.iter().map(|raw| codec.decode(raw)).collect(),
        Some(other) => Err(OdmError::type_mismatch("list", other.type_name())),
    }
}

/// Take every item equal to `value` out of `items`.
fn remove_equal(items: &mut Vec<Value>, value: &Value) -> Vec<Value> {
    let (removed, kept): (Vec<Value>, Vec<Value>) = std::mem::take(items)
        .into_iter()
        .partition(|item| item == value);
    *items = kept;
    removed
}

fn out_of_range(index: usize, len: usize) -> OdmError {
    OdmError::IndexOutOfRange { index, len }
}

// -- List --------------------------------------------------------------------

struct ListInner {
    item: Arc<dyn Codec>,
    items: RefCell<Vec<Value>>,
    anchor: Anchor,
}

/// Ordered sequence field value.
#[derive(Clone)]
pub struct List {
    inner: Rc<ListInner>,
}

impl List {
    pub fn new(item: Arc<dyn Codec>) -> Self {
        Self::from_items(item, Vec::new())
    }

    /// Items must already be normalized by `item`.
    pub(crate) fn from_items(item: Arc<dyn Codec>, items: Vec<Value>) -> Self {
        Self {
            inner: Rc::new(ListInner {
                item,
                items: RefCell::new(items),
                anchor: Anchor::default(),
            }),
        }
    }

    pub fn item_codec(&self) -> &Arc<dyn Codec> {
        &self.inner.item
    }

    pub fn ptr_eq(&self, other: &List) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn attach(&self, parent: &Document, name: &str) {
        self.inner.anchor.set(parent, name);
        for item in self.inner.items.borrow().iter() {
            self.inner.anchor.adopt(item);
        }
    }

    pub(crate) fn detach(&self) {
        for item in self.inner.items.borrow().iter() {
            self.inner.anchor.release(item);
        }
        self.inner.anchor.clear();
    }

    /// Dotted path of the owning field, if stored in a document.
    pub fn path(&self) -> Option<String> {
        self.inner.anchor.path()
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    pub fn get(&self, index: usize) -> OdmResult<Value> {
        let items = self.inner.items.borrow();
        items
            .get(index)
            .cloned()
            .ok_or_else(|| out_of_range(index, items.len()))
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.inner.items.borrow().contains(value)
    }

    fn normalize(&self, value: Value) -> OdmResult<Value> {
        self.inner.item.normalize(value).map_err(item_error)
    }

    fn touched(&self) {
        self.inner.anchor.touched(Value::List(self.clone()));
    }

    pub fn append(&self, value: impl Into<Value>) -> OdmResult<()> {
        let value = self.normalize(value.into())?;
        self.inner.anchor.adopt(&value);
        self.inner.items.borrow_mut().push(value);
        self.touched();
        Ok(())
    }

    /// Insert before `index`; `index == len` appends.
    pub fn insert(&self, index: usize, value: impl Into<Value>) -> OdmResult<()> {
        let value = self.normalize(value.into())?;
        {
            let mut items = self.inner.items.borrow_mut();
            if index > items.len() {
                return Err(out_of_range(index, items.len()));
            }
            self.inner.anchor.adopt(&value);
            items.insert(index, value);
        }
        self.touched();
        Ok(())
    }

    pub fn set(&self, index: usize, value: impl Into<Value>) -> OdmResult<()> {
        let value = self.normalize(value.into())?;
        let previous = {
            let mut items = self.inner.items.borrow_mut();
            let len = items.len();
            let slot = items.get_mut(index).ok_or_else(|| out_of_range(index, len))?;
            self.inner.anchor.adopt(&value);
            std::mem::replace(slot, value)
        };
        self.inner.anchor.release(&previous);
        self.touched();
        Ok(())
    }

    pub fn remove_at(&self, index: usize) -> OdmResult<Value> {
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                return Err(out_of_range(index, items.len()));
            }
            items.remove(index)
        };
        self.inner.anchor.release(&removed);
        self.touched();
        Ok(removed)
    }

    pub fn pop(&self) -> Option<Value> {
        let popped = self.inner.items.borrow_mut().pop();
        if let Some(item) = &popped {
            self.inner.anchor.release(item);
            self.touched();
        }
        popped
    }

    pub fn extend<I, T>(&self, values: I) -> OdmResult<()>
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        let values = values
            .into_iter()
            .map(|v| self.normalize(v.into()))
            .collect::<OdmResult<Vec<_>>>()?;
        for value in &values {
            self.inner.anchor.adopt(value);
        }
        self.inner.items.borrow_mut().extend(values);
        self.touched();
        Ok(())
    }

    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.inner.items.borrow_mut());
        for item in &removed {
            self.inner.anchor.release(item);
        }
        self.touched();
    }

    /// Append `value` in storage with a single `$push`, then locally.
    pub fn push(&self, value: impl Into<Value>) -> Pending<'static, ()> {
        let (value, raw) = match self.prepare(value.into()) {
            Ok(prepared) => prepared,
            Err(e) => return Pending::fail(e),
        };
        let this = self.clone();
        direct_update(&self.inner.anchor, |p| UpdateOp::Push(p.to_string(), raw)).map(move |()| {
            this.inner.anchor.adopt(&value);
            this.inner.items.borrow_mut().push(value);
            Ok(())
        })
    }

    /// Remove every occurrence of `value` in storage with a single `$pull`,
    /// then locally.
    pub fn pull(&self, value: impl Into<Value>) -> Pending<'static, ()> {
        let (value, raw) = match self.prepare(value.into()) {
            Ok(prepared) => prepared,
            Err(e) => return Pending::fail(e),
        };
        let this = self.clone();
        direct_update(&self.inner.anchor, |p| UpdateOp::Pull(p.to_string(), raw)).map(move |()| {
            for item in remove_equal(&mut this.inner.items.borrow_mut(), &value) {
                this.inner.anchor.release(&item);
            }
            Ok(())
        })
    }

    /// Replace the local items with the stored ones.
    pub fn reload(&self) -> Pending<'static, ()> {
        let this = self.clone();
        fetch_stored(&self.inner.anchor).map(move |stored| {
            let items = decode_items(&this.inner.item, stored)?;
            for item in &items {
                this.inner.anchor.adopt(item);
            }
            let previous = std::mem::replace(&mut *this.inner.items.borrow_mut(), items);
            for item in &previous {
                this.inner.anchor.release(item);
            }
            Ok(())
        })
    }

    fn prepare(&self, value: Value) -> OdmResult<(Value, Raw)> {
        let value = self.normalize(value)?;
        let raw = self.inner.item.encode(&value)?;
        Ok((value, raw))
    }

    pub(crate) fn encode_with(&self, item: &dyn Codec) -> OdmResult<Raw> {
        self.inner
            .items
            .borrow()
            .iter()
            .map(|v| item.encode(v))
            .collect::<OdmResult<Vec<_>>>()
            .map(Raw::List)
    }
}

impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("List")?;
        f.debug_list().entries(self.inner.items.borrow().iter()).finish()
    }
}

// -- Set ---------------------------------------------------------------------

struct SetInner {
    item: Arc<dyn Codec>,
    items: RefCell<Vec<Value>>,
    anchor: Anchor,
}

/// Unordered collection of distinct items. Iteration follows insertion order.
#[derive(Clone)]
pub struct Set {
    inner: Rc<SetInner>,
}

impl Set {
    pub fn new(item: Arc<dyn Codec>) -> Self {
        Self::from_items(item, Vec::new())
    }

    /// Items must already be normalized; duplicates are dropped.
    pub(crate) fn from_items(item: Arc<dyn Codec>, items: Vec<Value>) -> Self {
        let mut unique: Vec<Value> = Vec::with_capacity(items.len());
        for value in items {
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        Self {
            inner: Rc::new(SetInner {
                item,
                items: RefCell::new(unique),
                anchor: Anchor::default(),
            }),
        }
    }

    pub fn item_codec(&self) -> &Arc<dyn Codec> {
        &self.inner.item
    }

    pub fn ptr_eq(&self, other: &Set) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn attach(&self, parent: &Document, name: &str) {
        self.inner.anchor.set(parent, name);
        for item in self.inner.items.borrow().iter() {
            self.inner.anchor.adopt(item);
        }
    }

    pub(crate) fn detach(&self) {
        for item in self.inner.items.borrow().iter() {
            self.inner.anchor.release(item);
        }
        self.inner.anchor.clear();
    }

    pub fn path(&self) -> Option<String> {
        self.inner.anchor.path()
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.inner.items.borrow().contains(value)
    }

    pub fn to_vec(&self) -> Vec<Value> {
        self.inner.items.borrow().clone()
    }

    /// Sets have no positions.
    pub fn get_index(&self, _index: usize) -> OdmResult<Value> {
        Err(OdmError::type_mismatch("list", "set"))
    }

    /// Sets have no positions.
    pub fn set_index(&self, _index: usize, _value: impl Into<Value>) -> OdmResult<()> {
        Err(OdmError::type_mismatch("list", "set"))
    }

    fn normalize(&self, value: Value) -> OdmResult<Value> {
        self.inner.item.normalize(value).map_err(item_error)
    }

    fn touched(&self) {
        self.inner.anchor.touched(Value::Set(self.clone()));
    }

    /// Add `value` unless present. Returns whether it was added.
    pub fn add(&self, value: impl Into<Value>) -> OdmResult<bool> {
        let value = self.normalize(value.into())?;
        if self.contains(&value) {
            return Ok(false);
        }
        self.inner.anchor.adopt(&value);
        self.inner.items.borrow_mut().push(value);
        self.touched();
        Ok(true)
    }

    /// Remove `value` if present. Returns whether it was removed.
    pub fn discard(&self, value: impl Into<Value>) -> OdmResult<bool> {
        let value = self.normalize(value.into())?;
        let removed = remove_equal(&mut self.inner.items.borrow_mut(), &value);
        for item in &removed {
            self.inner.anchor.release(item);
        }
        if !removed.is_empty() {
            self.touched();
        }
        Ok(!removed.is_empty())
    }

    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.inner.items.borrow_mut());
        for item in &removed {
            self.inner.anchor.release(item);
        }
        self.touched();
    }

    /// Add `value` in storage with a single `$addToSet`, then locally.
    pub fn add_to_set(&self, value: impl Into<Value>) -> Pending<'static, ()> {
        let (value, raw) = match self.prepare(value.into()) {
            Ok(prepared) => prepared,
            Err(e) => return Pending::fail(e),
        };
        let this = self.clone();
        direct_update(&self.inner.anchor, |p| UpdateOp::AddToSet(p.to_string(), raw)).map(move |()| {
            let mut items = this.inner.items.borrow_mut();
            if !items.contains(&value) {
                this.inner.anchor.adopt(&value);
                items.push(value);
            }
            Ok(())
        })
    }

    /// Remove `value` in storage with a single `$pull`, then locally.
    pub fn pull(&self, value: impl Into<Value>) -> Pending<'static, ()> {
        let (value, raw) = match self.prepare(value.into()) {
            Ok(prepared) => prepared,
            Err(e) => return Pending::fail(e),
        };
        let this = self.clone();
        direct_update(&self.inner.anchor, |p| UpdateOp::Pull(p.to_string(), raw)).map(move |()| {
            for item in remove_equal(&mut this.inner.items.borrow_mut(), &value) {
                this.inner.anchor.release(&item);
            }
            Ok(())
        })
    }

    pub fn reload(&self) -> Pending<'static, ()> {
        let this = self.clone();
        fetch_stored(&self.inner.anchor).map(move |stored| {
            let fresh = Set::from_items(
                Arc::clone(&this.inner.item),
                decode_items(&this.inner.item, stored)?,
            );
            let items = fresh.to_vec();
            for item in &items {
                this.inner.anchor.adopt(item);
            }
            let previous = std::mem::replace(&mut *this.inner.items.borrow_mut(), items);
            for item in &previous {
                this.inner.anchor.release(item);
            }
            Ok(())
        })
    }

    fn prepare(&self, value: Value) -> OdmResult<(Value, Raw)> {
        let value = self.normalize(value)?;
        let raw = self.inner.item.encode(&value)?;
        Ok((value, raw))
    }

    pub(crate) fn encode_with(&self, item: &dyn Codec) -> OdmResult<Raw> {
        self.inner
            .items
            .borrow()
            .iter()
            .map(|v| item.encode(v))
            .collect::<OdmResult<Vec<_>>>()
            .map(Raw::List)
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Set")?;
        f.debug_set().entries(self.inner.items.borrow().iter()).finish()
    }
}

// -- Map ---------------------------------------------------------------------

struct MapInner {
    value: Arc<dyn Codec>,
    keys: Arc<dyn KeyCoercion>,
    /// Storage key -> (key as given back to callers, value).
    entries: RefCell<BTreeMap<String, (Value, Value)>>,
    anchor: Anchor,
}

/// Keyed mapping field value. Keys are coerced to storage strings by the
/// field's [`KeyCoercion`]; iteration is ordered by storage key.
#[derive(Clone)]
pub struct Map {
    inner: Rc<MapInner>,
}

impl Map {
    pub fn new(value: Arc<dyn Codec>, keys: Arc<dyn KeyCoercion>) -> Self {
        Self::from_entries(value, keys, BTreeMap::new())
    }

    pub(crate) fn from_entries(
        value: Arc<dyn Codec>,
        keys: Arc<dyn KeyCoercion>,
        entries: BTreeMap<String, (Value, Value)>,
    ) -> Self {
        Self {
            inner: Rc::new(MapInner {
                value,
                keys,
                entries: RefCell::new(entries),
                anchor: Anchor::default(),
            }),
        }
    }

    pub fn value_codec(&self) -> &Arc<dyn Codec> {
        &self.inner.value
    }

    pub fn ptr_eq(&self, other: &Map) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn attach(&self, parent: &Document, name: &str) {
        self.inner.anchor.set(parent, name);
        for (_, value) in self.inner.entries.borrow().values() {
            self.inner.anchor.adopt(value);
        }
    }

    pub(crate) fn detach(&self) {
        for (_, value) in self.inner.entries.borrow().values() {
            self.inner.anchor.release(value);
        }
        self.inner.anchor.clear();
    }

    pub fn path(&self) -> Option<String> {
        self.inner.anchor.path()
    }

    pub fn len(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.borrow().is_empty()
    }

    pub fn get(&self, key: impl Into<Value>) -> OdmResult<Option<Value>> {
        let key = self.inner.keys.to_key(&key.into())?;
        Ok(self
            .inner
            .entries
            .borrow()
            .get(&key)
            .map(|(_, value)| value.clone()))
    }

    pub fn contains_key(&self, key: impl Into<Value>) -> OdmResult<bool> {
        let key = self.inner.keys.to_key(&key.into())?;
        Ok(self.inner.entries.borrow().contains_key(&key))
    }

    pub fn keys(&self) -> Vec<Value> {
        self.inner
            .entries
            .borrow()
            .values()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.inner
            .entries
            .borrow()
            .values()
            .map(|(_, value)| value.clone())
            .collect()
    }

    pub fn entries(&self) -> Vec<(Value, Value)> {
        self.inner.entries.borrow().values().cloned().collect()
    }

    fn prepare(&self, key: Value, value: Value) -> OdmResult<(String, Value, Value)> {
        let stored = self.inner.keys.to_key(&key)?;
        let key = self.inner.keys.from_key(&stored)?;
        let value = self.inner.value.normalize(value).map_err(item_error)?;
        Ok((stored, key, value))
    }

    fn touched(&self) {
        self.inner.anchor.touched(Value::Map(self.clone()));
    }

    /// Insert or replace an entry, returning the previous value.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> OdmResult<Option<Value>> {
        let (stored, key, value) = self.prepare(key.into(), value.into())?;
        self.inner.anchor.adopt(&value);
        let previous = self
            .inner
            .entries
            .borrow_mut()
            .insert(stored, (key, value))
            .map(|(_, v)| v);
        if let Some(previous) = &previous {
            self.inner.anchor.release(previous);
        }
        self.touched();
        Ok(previous)
    }

    pub fn remove(&self, key: impl Into<Value>) -> OdmResult<Option<Value>> {
        let key = self.inner.keys.to_key(&key.into())?;
        let removed = self.inner.entries.borrow_mut().remove(&key).map(|(_, v)| v);
        if let Some(value) = &removed {
            self.inner.anchor.release(value);
            self.touched();
        }
        Ok(removed)
    }

    pub fn clear(&self) {
        let removed = std::mem::take(&mut *self.inner.entries.borrow_mut());
        for (_, value) in removed.values() {
            self.inner.anchor.release(value);
        }
        self.touched();
    }

    /// Write one entry in storage with a single `$set` on `path.key`, then
    /// locally.
    pub fn set(&self, key: impl Into<Value>, value: impl Into<Value>) -> Pending<'static, ()> {
        let prepared = self
            .prepare(key.into(), value.into())
            .and_then(|(stored, key, value)| {
                let raw = self.inner.value.encode(&value)?;
                Ok((stored, key, value, raw))
            });
        let (stored, key, value, raw) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return Pending::fail(e),
        };
        let this = self.clone();
        direct_update(&self.inner.anchor, |p| UpdateOp::Set(path::join(p, &stored), raw)).map(
            move |()| {
                this.inner.anchor.adopt(&value);
                let previous = this.inner.entries.borrow_mut().insert(stored, (key, value));
                if let Some((_, previous)) = &previous {
                    this.inner.anchor.release(previous);
                }
                Ok(())
            },
        )
    }

    /// Remove one entry in storage with a single `$unset` on `path.key`, then
    /// locally.
    pub fn unset(&self, key: impl Into<Value>) -> Pending<'static, ()> {
        let stored = match self.inner.keys.to_key(&key.into()) {
            Ok(stored) => stored,
            Err(e) => return Pending::fail(e),
        };
        let this = self.clone();
        direct_update(&self.inner.anchor, |p| UpdateOp::Unset(path::join(p, &stored))).map(
            move |()| {
                let removed = this.inner.entries.borrow_mut().remove(&stored);
                if let Some((_, value)) = &removed {
                    this.inner.anchor.release(value);
                }
                Ok(())
            },
        )
    }

    pub fn reload(&self) -> Pending<'static, ()> {
        let this = self.clone();
        fetch_stored(&self.inner.anchor).map(move |stored| {
            let entries = match stored {
                None | Some(Raw::Null) => BTreeMap::new(),
                Some(Raw::Doc(doc)) => {
                    decode_entries(&this.inner.value, this.inner.keys.as_ref(), &doc)?
                }
                Some(other) => return Err(OdmError::type_mismatch("map", other.type_name())),
            };
            for (_, value) in entries.values() {
                this.inner.anchor.adopt(value);
            }
            let previous = std::mem::replace(&mut *this.inner.entries.borrow_mut(), entries);
            for (_, value) in previous.values() {
                this.inner.anchor.release(value);
            }
            Ok(())
        })
    }

    pub(crate) fn encode_with(&self, value: &dyn Codec) -> OdmResult<Raw> {
        let mut doc = RawDoc::new();
        for (stored, (_, v)) in self.inner.entries.borrow().iter() {
            doc.insert(stored.clone(), value.encode(v)?);
        }
        Ok(Raw::Doc(doc))
    }
}

pub(crate) fn decode_entries(
    value: &Arc<dyn Codec>,
    keys: &dyn KeyCoercion,
    doc: &RawDoc,
) -> OdmResult<BTreeMap<String, (Value, Value)>> {
    doc.iter()
        .map(|(stored, raw)| Ok((stored.clone(), (keys.from_key(stored)?, value.decode(raw)?))))
        .collect()
}

impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Map")?;
        f.debug_map()
            .entries(self.inner.entries.borrow().values().map(|(k, v)| (k, v)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Backend;
    use crate::codec::{EmbeddedCodec, IntCodec, ListCodec, MapCodec, SetCodec, StrCodec};
    use crate::schema::{Schema, SchemaBuilder};
    use docmap_store::{Collaborator, InMemoryStore};
    use docmap_types::raw_doc;
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        SchemaBuilder::document("Bag", "bags")
            .field("nums", ListCodec::new(IntCodec::new()))
            .field("tags", SetCodec::new(StrCodec::new()))
            .field("meta", MapCodec::new(IntCodec::new()))
            .build()
    }

    fn outer_schema() -> Arc<Schema> {
        let labels = SchemaBuilder::embedded("Labels")
            .field("tags", ListCodec::new(StrCodec::new()))
            .build();
        SchemaBuilder::document("Outer", "outers")
            .field("e", EmbeddedCodec::new(Arc::clone(&labels)))
            .field("rows", ListCodec::new(EmbeddedCodec::new(labels)))
            .build()
    }

    fn stored_outer(store: &Arc<InMemoryStore>) -> Document {
        let record = raw_doc(json!({"e": {"tags": ["a"]}, "rows": [{"tags": []}]})).unwrap();
        let id = Collaborator::insert_one(store.as_ref(), "outers", record).unwrap();
        let doc = Document::new(outer_schema());
        doc.replace_raw(store.peek("outers", id).unwrap(), &[]).unwrap();
        doc.bind(Binding::new(Backend::Blocking(store.clone())));
        doc
    }

    fn int_list() -> List {
        List::new(Arc::new(IntCodec::new()))
    }

    /// A stored, bound document with `nums = [1, 2, 3]`.
    fn stored(store: &Arc<InMemoryStore>) -> Document {
        let record = raw_doc(json!({"nums": [1, 2, 3], "tags": ["a"], "meta": {"k": 1}})).unwrap();
        let id = Collaborator::insert_one(store.as_ref(), "bags", record).unwrap();
        let record = store.peek("bags", id).unwrap();
        let doc = Document::new(schema());
        doc.replace_raw(record, &[]).unwrap();
        doc.bind(Binding::new(Backend::Blocking(store.clone())));
        doc
    }

    #[test]
    fn local_ops_on_detached_list() {
        let list = int_list();
        list.append(1).unwrap();
        list.insert(0, 0).unwrap();
        list.set(1, 5).unwrap();
        assert_eq!(list.to_vec(), vec![Value::Int(0), Value::Int(5)]);
        assert_eq!(list.remove_at(0).unwrap(), Value::Int(0));
        assert_eq!(list.pop(), Some(Value::Int(5)));
        assert!(list.is_empty());
    }

    #[test]
    fn positional_errors() {
        let list = int_list();
        assert!(matches!(
            list.get(0),
            Err(OdmError::IndexOutOfRange { index: 0, len: 0 })
        ));
        assert!(matches!(list.insert(2, 1), Err(OdmError::IndexOutOfRange { .. })));
        assert!(matches!(list.remove_at(0), Err(OdmError::IndexOutOfRange { .. })));
    }

    #[test]
    fn invalid_item_is_a_value_error() {
        let list = int_list();
        assert!(matches!(list.append("x"), Err(OdmError::Value(_))));
        assert!(list.is_empty());
    }

    #[test]
    fn local_mutation_marks_owner_changed() {
        let doc = Document::new(schema());
        let nums = doc.get("nums").unwrap().as_list().unwrap().clone();
        assert!(!doc.is_changed());
        nums.append(7).unwrap();
        assert_eq!(doc.changed_fields(), vec!["nums"]);
        assert_eq!(
            doc.save_ops().unwrap(),
            vec![UpdateOp::Set("nums".into(), Raw::List(vec![Raw::Int(7)]))]
        );
        assert_eq!(doc.log().kinds(), vec!["change_child"]);
    }

    #[test]
    fn set_deduplicates_and_has_no_positions() {
        let set = Set::new(Arc::new(StrCodec::new()));
        assert!(set.add("a").unwrap());
        assert!(!set.add("a").unwrap());
        assert_eq!(set.len(), 1);
        assert!(matches!(set.get_index(0), Err(OdmError::Type { .. })));
        assert!(matches!(set.set_index(0, "b"), Err(OdmError::Type { .. })));
        assert!(set.discard("a").unwrap());
        assert!(set.is_empty());
    }

    #[test]
    fn map_keys_are_coerced() {
        let map = Map::new(Arc::new(IntCodec::new()), Arc::new(crate::codec::StringKeys));
        assert_eq!(map.insert("a", 1).unwrap(), None);
        assert_eq!(map.insert("a", 2).unwrap(), Some(Value::Int(1)));
        assert_eq!(map.get("a").unwrap(), Some(Value::Int(2)));
        assert!(matches!(map.insert("a.b", 1), Err(OdmError::Value(_))));
        assert!(matches!(map.insert(1, 1), Err(OdmError::Type { .. })));
        assert_eq!(map.remove("a").unwrap(), Some(Value::Int(2)));
        assert!(map.is_empty());
    }

    #[test]
    fn push_is_one_round_trip_and_leaves_field_clean() {
        let store = Arc::new(InMemoryStore::new());
        let doc = stored(&store);
        let nums = doc.get("nums").unwrap().as_list().unwrap().clone();
        let before = store.stats();

        nums.push(4).wait().unwrap();

        let after = store.stats();
        assert_eq!(after.update - before.update, 1);
        assert_eq!(after.total() - before.total(), 1);
        assert_eq!(nums.len(), 4);
        assert!(!doc.is_changed());
        let record = store.peek("bags", doc.id().unwrap()).unwrap();
        assert_eq!(
            record.get("nums"),
            Some(&Raw::List(vec![Raw::Int(1), Raw::Int(2), Raw::Int(3), Raw::Int(4)]))
        );
        assert_eq!(doc.log().kinds(), vec!["update_one"]);
    }

    #[test]
    fn pull_and_add_to_set_hit_storage() {
        let store = Arc::new(InMemoryStore::new());
        let doc = stored(&store);
        let nums = doc.get("nums").unwrap().as_list().unwrap().clone();
        nums.pull(2).wait().unwrap();
        assert_eq!(nums.to_vec(), vec![Value::Int(1), Value::Int(3)]);

        let tags = doc.get("tags").unwrap().as_set().unwrap().clone();
        tags.add_to_set("a").wait().unwrap();
        tags.add_to_set("b").wait().unwrap();
        assert_eq!(tags.len(), 2);

        let record = store.peek("bags", doc.id().unwrap()).unwrap();
        assert_eq!(record.get("nums"), Some(&Raw::List(vec![Raw::Int(1), Raw::Int(3)])));
        assert_eq!(
            record.get("tags"),
            Some(&Raw::List(vec![Raw::from("a"), Raw::from("b")]))
        );
    }

    #[test]
    fn map_direct_ops_target_the_entry_path() {
        let store = Arc::new(InMemoryStore::new());
        let doc = stored(&store);
        let meta = doc.get("meta").unwrap().as_map().unwrap().clone();
        meta.set("n", 5).wait().unwrap();
        meta.unset("k").wait().unwrap();
        assert_eq!(meta.keys(), vec![Value::from("n")]);

        let record = store.peek("bags", doc.id().unwrap()).unwrap();
        assert_eq!(record.get("meta"), Some(&Raw::Doc(raw_doc(json!({"n": 5})).unwrap())));
        assert!(!doc.is_changed());
    }

    #[test]
    fn push_inside_embedded_targets_the_dotted_path() {
        let store = Arc::new(InMemoryStore::new());
        let doc = stored_outer(&store);
        let tags = doc.get_path("e.tags").unwrap().as_list().unwrap().clone();
        assert_eq!(tags.path().as_deref(), Some("e.tags"));

        tags.push("b").wait().unwrap();

        let record = store.peek("outers", doc.id().unwrap()).unwrap();
        assert_eq!(
            path::get(&record, "e.tags"),
            Some(&Raw::List(vec![Raw::from("a"), Raw::from("b")]))
        );
        assert_eq!(
            doc.log().entries(),
            &[LogEntry::UpdateOne {
                ops: vec![UpdateOp::Push("e.tags".into(), Raw::from("b"))]
            }]
        );
        assert_eq!(tags.len(), 2);
        assert!(!doc.is_changed());
    }

    #[test]
    fn direct_op_inside_a_list_item_is_refused() {
        let store = Arc::new(InMemoryStore::new());
        let doc = stored_outer(&store);
        let rows = doc.get("rows").unwrap().as_list().unwrap().clone();
        let row = rows.get(0).unwrap().as_document().unwrap().clone();
        let tags = row.get("tags").unwrap().as_list().unwrap().clone();
        let before = store.stats();
        assert!(matches!(tags.push("x").wait(), Err(OdmError::Protocol(_))));
        assert_eq!(store.stats(), before);

        tags.append("x").unwrap();
        assert_eq!(doc.changed_fields(), vec!["rows"]);
    }

    #[test]
    fn direct_op_on_detached_container_is_a_protocol_error() {
        let list = int_list();
        assert!(matches!(list.push(1).wait(), Err(OdmError::Protocol(_))));
    }

    #[test]
    fn direct_op_without_binding() {
        let doc = Document::new(schema());
        let nums = doc.get("nums").unwrap().as_list().unwrap().clone();
        assert!(matches!(
            nums.push(1).wait(),
            Err(OdmError::NotBindingToDatabase)
        ));
    }

    #[test]
    fn invalid_direct_item_sends_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let doc = stored(&store);
        let nums = doc.get("nums").unwrap().as_list().unwrap().clone();
        let before = store.stats();
        assert!(matches!(nums.push("x").wait(), Err(OdmError::Value(_))));
        assert_eq!(store.stats(), before);
        assert_eq!(nums.len(), 3);
    }

    #[test]
    fn reload_replaces_local_items() {
        let store = Arc::new(InMemoryStore::new());
        let doc = stored(&store);
        let nums = doc.get("nums").unwrap().as_list().unwrap().clone();
        nums.append(9).unwrap();
        nums.reload().wait().unwrap();
        assert_eq!(nums.len(), 3);
    }

    #[tokio::test]
    async fn suspending_push_applies_after_completion() {
        let store = Arc::new(InMemoryStore::new());
        let doc = stored(&store);
        doc.bind(Binding::new(Backend::Suspending(store.clone())));
        let nums = doc.get("nums").unwrap().as_list().unwrap().clone();

        let pending = nums.push(4);
        assert!(!pending.is_ready());
        assert_eq!(nums.len(), 3);
        pending.await.unwrap();
        assert_eq!(nums.len(), 4);
    }

    #[tokio::test]
    async fn dropped_suspended_push_changes_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let doc = stored(&store);
        doc.bind(Binding::new(Backend::Suspending(store.clone())));
        let nums = doc.get("nums").unwrap().as_list().unwrap().clone();
        drop(nums.push(4));
        assert_eq!(nums.len(), 3);
        assert_eq!(store.stats().update, 0);
    }
}

use std::collections::BTreeMap;
use std::sync::Arc;

use docmap_types::{ObjectId, Raw};
use rand::Rng;

use super::{item_error, Codec, KeyCoercion, StringKeys};
use crate::containers::{decode_entries, List, Map, Set};
use crate::document::Document;
use crate::error::{OdmError, OdmResult};
use crate::fake::{fake_document, FakeContext};
use crate::reference::{Reference, ReferenceList};
use crate::schema::Schema;
use crate::serializer::{from_storage, to_storage, EncodeOptions};
use crate::value::Value;

fn mismatch<T>(expected: &str, found: &str) -> OdmResult<T> {
    Err(OdmError::type_mismatch(expected, found))
}

/// Literal or container input flattened to its items.
fn items_of(value: Value) -> OdmResult<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::List(list) => Ok(list.to_vec()),
        Value::Set(set) => Ok(set.to_vec()),
        Value::Raw(Raw::List(items)) => Ok(items.iter().map(Value::from_scalar_raw).collect()),
        other => mismatch("sequence", other.type_name()),
    }
}

fn fake_len(ctx: &mut FakeContext) -> usize {
    ctx.rng().gen_range(1..=3)
}

// -- Embedded documents ------------------------------------------------------

/// A document of an embedded schema stored inline.
#[derive(Clone, Debug)]
pub struct EmbeddedCodec {
    schema: Arc<Schema>,
    auto_create: bool,
}

impl EmbeddedCodec {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            auto_create: false,
        }
    }

    /// Default to an empty document instead of leaving the field unset.
    pub fn auto_create(mut self) -> Self {
        self.auto_create = true;
        self
    }
}

impl Codec for EmbeddedCodec {
    fn type_name(&self) -> &'static str {
        "embedded"
    }

    fn default_value(&self) -> Option<Value> {
        self.auto_create
            .then(|| Value::Document(Document::new(Arc::clone(&self.schema))))
    }

    fn normalize(&self, value: Value) -> OdmResult<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::Document(doc) if doc.schema().name() == self.schema.name() => {
                Ok(Value::Document(doc))
            }
            Value::Document(doc) => mismatch(self.schema.name(), doc.schema().name()),
            Value::Pairs(pairs) => {
                let doc = Document::new(Arc::clone(&self.schema));
                for (key, value) in pairs {
                    let Some(name) = key.as_str() else {
                        return mismatch("str key", key.type_name());
                    };
                    doc.set(name, value)?;
                }
                Ok(Value::Document(doc))
            }
            Value::Raw(Raw::Doc(record)) => {
                Ok(Value::Document(from_storage(&self.schema, record, &[])?))
            }
            other => mismatch(self.schema.name(), other.type_name()),
        }
    }

    fn encode(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Null => Ok(Raw::Null),
            Value::Document(doc) => to_storage(doc, &EncodeOptions::default()).map(Raw::Doc),
            other => mismatch(self.schema.name(), other.type_name()),
        }
    }

    fn decode(&self, raw: &Raw) -> OdmResult<Value> {
        match raw {
            Raw::Null => Ok(Value::Null),
            Raw::Doc(record) => Ok(Value::Document(from_storage(
                &self.schema,
                record.clone(),
                &[],
            )?)),
            other => mismatch("document", other.type_name()),
        }
    }

    fn fake(&self, depth: i32, ctx: &mut FakeContext) -> Option<Value> {
        if depth < 0 {
            return None;
        }
        fake_document(&self.schema, depth - 1, ctx)
            .ok()
            .map(Value::Document)
    }

    fn clone_codec(&self) -> Arc<dyn Codec> {
        Arc::new(self.clone())
    }

    fn embedded_schema(&self) -> Option<&Arc<Schema>> {
        Some(&self.schema)
    }
}

// -- Lists and sets ----------------------------------------------------------

/// Ordered sequence of items of one codec.
#[derive(Clone, Debug)]
pub struct ListCodec {
    item: Arc<dyn Codec>,
}

impl ListCodec {
    pub fn new(item: impl Codec + 'static) -> Self {
        Self::of(Arc::new(item))
    }

    pub fn of(item: Arc<dyn Codec>) -> Self {
        Self { item }
    }

    fn normalize_items(&self, value: Value) -> OdmResult<Vec<Value>> {
        items_of(value)?
            .into_iter()
            .map(|item| self.item.normalize(item).map_err(item_error))
            .collect()
    }

    fn decode_items(&self, raw: &Raw) -> OdmResult<Vec<Value>> {
        match raw {
            Raw::Null => Ok(Vec::new()),
            Raw::List(items) => items.iter().map(|raw| self.item.decode(raw)).collect(),
            other => mismatch("list", other.type_name()),
        }
    }

    fn fake_items(&self, depth: i32, ctx: &mut FakeContext) -> Vec<Value> {
        let n = fake_len(ctx);
        (0..n).filter_map(|_| self.item.fake(depth, ctx)).collect()
    }
}

impl Codec for ListCodec {
    fn type_name(&self) -> &'static str {
        "list"
    }

    fn default_value(&self) -> Option<Value> {
        Some(Value::List(List::new(Arc::clone(&self.item))))
    }

    fn normalize(&self, value: Value) -> OdmResult<Value> {
        let items = self.normalize_items(value)?;
        Ok(Value::List(List::from_items(Arc::clone(&self.item), items)))
    }

    fn encode(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::List(list) => list.encode_with(self.item.as_ref()),
            other => mismatch("list", other.type_name()),
        }
    }

    fn decode(&self, raw: &Raw) -> OdmResult<Value> {
        let items = self.decode_items(raw)?;
        Ok(Value::List(List::from_items(Arc::clone(&self.item), items)))
    }

    fn fake(&self, depth: i32, ctx: &mut FakeContext) -> Option<Value> {
        if depth < 0 {
            return None;
        }
        let items = self.fake_items(depth, ctx);
        Some(Value::List(List::from_items(Arc::clone(&self.item), items)))
    }

    fn clone_codec(&self) -> Arc<dyn Codec> {
        Arc::new(Self::of(self.item.clone_codec()))
    }
}

/// Collection of distinct items of one codec, stored as a sequence.
#[derive(Clone, Debug)]
pub struct SetCodec {
    list: ListCodec,
}

impl SetCodec {
    pub fn new(item: impl Codec + 'static) -> Self {
        Self::of(Arc::new(item))
    }

    pub fn of(item: Arc<dyn Codec>) -> Self {
        Self {
            list: ListCodec::of(item),
        }
    }

    fn build(&self, items: Vec<Value>) -> Value {
        Value::Set(Set::from_items(Arc::clone(&self.list.item), items))
    }
}

impl Codec for SetCodec {
    fn type_name(&self) -> &'static str {
        "set"
    }

    fn default_value(&self) -> Option<Value> {
        Some(self.build(Vec::new()))
    }

    fn normalize(&self, value: Value) -> OdmResult<Value> {
        Ok(self.build(self.list.normalize_items(value)?))
    }

    fn encode(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Set(set) => set.encode_with(self.list.item.as_ref()),
            other => mismatch("set", other.type_name()),
        }
    }

    fn decode(&self, raw: &Raw) -> OdmResult<Value> {
        Ok(self.build(self.list.decode_items(raw)?))
    }

    fn fake(&self, depth: i32, ctx: &mut FakeContext) -> Option<Value> {
        if depth < 0 {
            return None;
        }
        Some(self.build(self.list.fake_items(depth, ctx)))
    }

    fn clone_codec(&self) -> Arc<dyn Codec> {
        Arc::new(Self::of(self.list.item.clone_codec()))
    }
}

// -- Maps --------------------------------------------------------------------

/// Mapping from coerced keys to values of one codec, stored as a sub-record.
#[derive(Clone, Debug)]
pub struct MapCodec {
    value: Arc<dyn Codec>,
    keys: Arc<dyn KeyCoercion>,
}

impl MapCodec {
    pub fn new(value: impl Codec + 'static) -> Self {
        Self {
            value: Arc::new(value),
            keys: Arc::new(StringKeys),
        }
    }

    pub fn with_keys(mut self, keys: impl KeyCoercion + 'static) -> Self {
        self.keys = Arc::new(keys);
        self
    }

    fn build(&self, entries: BTreeMap<String, (Value, Value)>) -> Value {
        Value::Map(Map::from_entries(
            Arc::clone(&self.value),
            Arc::clone(&self.keys),
            entries,
        ))
    }

    fn fake_key(&self, index: usize, ctx: &mut FakeContext) -> Option<(String, Value)> {
        let candidates = [format!("key{index}"), ObjectId::from_bytes(ctx.rng().gen()).to_hex()];
        candidates.into_iter().find_map(|candidate| {
            let key = self.keys.from_key(&candidate).ok()?;
            Some((self.keys.to_key(&key).ok()?, key))
        })
    }
}

impl Codec for MapCodec {
    fn type_name(&self) -> &'static str {
        "map"
    }

    fn default_value(&self) -> Option<Value> {
        Some(self.build(BTreeMap::new()))
    }

    fn normalize(&self, value: Value) -> OdmResult<Value> {
        let pairs = match value {
            Value::Pairs(pairs) => pairs,
            Value::Map(map) => map.entries(),
            Value::Raw(Raw::Doc(record)) => record
                .iter()
                .map(|(k, v)| (Value::Str(k.clone()), Value::from_scalar_raw(v)))
                .collect(),
            other => return mismatch("map", other.type_name()),
        };
        let mut entries = BTreeMap::new();
        for (key, value) in pairs {
            let stored = self.keys.to_key(&key)?;
            let key = self.keys.from_key(&stored)?;
            let value = self.value.normalize(value).map_err(item_error)?;
            entries.insert(stored, (key, value));
        }
        Ok(self.build(entries))
    }

    fn encode(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Map(map) => map.encode_with(self.value.as_ref()),
            other => mismatch("map", other.type_name()),
        }
    }

    fn decode(&self, raw: &Raw) -> OdmResult<Value> {
        match raw {
            Raw::Null => Ok(self.build(BTreeMap::new())),
            Raw::Doc(record) => Ok(self.build(decode_entries(
                &self.value,
                self.keys.as_ref(),
                record,
            )?)),
            other => mismatch("map", other.type_name()),
        }
    }

    fn fake(&self, depth: i32, ctx: &mut FakeContext) -> Option<Value> {
        if depth < 0 {
            return None;
        }
        let mut entries = BTreeMap::new();
        for index in 0..fake_len(ctx) {
            let Some((stored, key)) = self.fake_key(index, ctx) else {
                continue;
            };
            if let Some(value) = self.value.fake(depth, ctx) {
                entries.insert(stored, (key, value));
            }
        }
        Some(self.build(entries))
    }

    fn clone_codec(&self) -> Arc<dyn Codec> {
        Arc::new(Self {
            value: self.value.clone_codec(),
            keys: Arc::clone(&self.keys),
        })
    }
}

// -- References --------------------------------------------------------------

fn id_of(target: &Schema, value: Value) -> OdmResult<ObjectId> {
    match value {
        Value::Id(id) => Ok(id),
        Value::Str(hex) => ObjectId::from_hex(&hex)
            .map_err(|e| OdmError::Value(format!("invalid {} id: {e}", target.name()))),
        Value::Reference(r) if r.target().name() == target.name() => Ok(r.id()),
        Value::Reference(r) => mismatch(target.name(), r.target().name()),
        Value::Document(doc) if doc.schema().name() != target.name() => {
            mismatch(target.name(), doc.schema().name())
        }
        Value::Document(doc) => doc.id().ok_or_else(|| {
            OdmError::Value(format!(
                "{} document has no id and cannot be referenced; save it first",
                target.name()
            ))
        }),
        other => mismatch("objectid", other.type_name()),
    }
}

/// Link to a single root document of `target`, stored as its id.
#[derive(Clone, Debug)]
pub struct ReferenceCodec {
    target: Arc<Schema>,
}

impl ReferenceCodec {
    pub fn new(target: Arc<Schema>) -> Self {
        Self { target }
    }
}

impl Codec for ReferenceCodec {
    fn type_name(&self) -> &'static str {
        "reference"
    }

    fn normalize(&self, value: Value) -> OdmResult<Value> {
        let target = Arc::clone(&self.target);
        match value {
            Value::Null => Ok(Value::Null),
            Value::Document(doc) => Ok(Value::Reference(Reference::to_document(target, &doc)?)),
            Value::Reference(r) if r.target().name() == self.target.name() => {
                Ok(Value::Reference(r.duplicate()))
            }
            other => Ok(Value::Reference(Reference::new(
                target,
                id_of(&self.target, other)?,
            ))),
        }
    }

    fn encode(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::Null => Ok(Raw::Null),
            Value::Reference(r) => Ok(Raw::Id(r.id())),
            other => mismatch("reference", other.type_name()),
        }
    }

    fn decode(&self, raw: &Raw) -> OdmResult<Value> {
        match raw {
            Raw::Null => Ok(Value::Null),
            Raw::Id(id) => Ok(Value::Reference(Reference::new(
                Arc::clone(&self.target),
                *id,
            ))),
            other => mismatch("objectid", other.type_name()),
        }
    }

    /// Targets have to exist in storage; there is nothing to invent.
    fn fake(&self, _depth: i32, _ctx: &mut FakeContext) -> Option<Value> {
        None
    }

    fn clone_codec(&self) -> Arc<dyn Codec> {
        Arc::new(self.clone())
    }
}

/// List of links to root documents of `target`, stored as a list of ids.
#[derive(Clone, Debug)]
pub struct ReferenceListCodec {
    target: Arc<Schema>,
}

impl ReferenceListCodec {
    pub fn new(target: Arc<Schema>) -> Self {
        Self { target }
    }
}

impl Codec for ReferenceListCodec {
    fn type_name(&self) -> &'static str {
        "reference_list"
    }

    fn default_value(&self) -> Option<Value> {
        Some(Value::ReferenceList(ReferenceList::new(
            Arc::clone(&self.target),
            Vec::new(),
        )))
    }

    fn normalize(&self, value: Value) -> OdmResult<Value> {
        let target = Arc::clone(&self.target);
        let items = match value {
            Value::ReferenceList(list) if list.target().name() == self.target.name() => {
                return Ok(Value::ReferenceList(list.duplicate()));
            }
            Value::Array(items) => items,
            other => return mismatch("reference_list", other.type_name()),
        };
        if !items.is_empty() && items.iter().all(|item| matches!(item, Value::Document(_))) {
            let docs = items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Document(doc) => Some(doc),
                    _ => None,
                })
                .collect();
            return Ok(Value::ReferenceList(ReferenceList::from_documents(
                target, docs,
            )?));
        }
        let ids = items
            .into_iter()
            .map(|item| id_of(&self.target, item).map_err(item_error))
            .collect::<OdmResult<Vec<_>>>()?;
        Ok(Value::ReferenceList(ReferenceList::new(target, ids)))
    }

    fn encode(&self, value: &Value) -> OdmResult<Raw> {
        match value {
            Value::ReferenceList(list) => Ok(Raw::List(list.ids().into_iter().map(Raw::Id).collect())),
            other => mismatch("reference_list", other.type_name()),
        }
    }

    fn decode(&self, raw: &Raw) -> OdmResult<Value> {
        let ids = match raw {
            Raw::Null => Vec::new(),
            Raw::List(items) => items
                .iter()
                .map(|item| match item {
                    Raw::Id(id) => Ok(*id),
                    other => mismatch("objectid", other.type_name()),
                })
                .collect::<OdmResult<Vec<_>>>()?,
            other => return mismatch("list", other.type_name()),
        };
        Ok(Value::ReferenceList(ReferenceList::new(
            Arc::clone(&self.target),
            ids,
        )))
    }

    fn fake(&self, _depth: i32, _ctx: &mut FakeContext) -> Option<Value> {
        None
    }

    fn clone_codec(&self) -> Arc<dyn Codec> {
        Arc::new(self.clone())
    }
}

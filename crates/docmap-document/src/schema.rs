//! Field tables for document types.
//!
//! A [`Schema`] is computed once per document type by a [`SchemaBuilder`] and
//! shared as `Arc<Schema>`. Attribute access on a [`Document`](crate::Document)
//! is an explicit dispatch through this table.

use std::fmt;
use std::sync::Arc;

use crate::codec::{Codec, ObjectIdCodec};
use crate::error::{OdmError, OdmResult};
use crate::fake::FakeHooks;

/// Name of the identifier field carried by every root document.
pub const ID_FIELD: &str = "_id";

/// Ordered mapping from field name to codec for one document type.
pub struct Schema {
    name: String,
    collection: Option<String>,
    fields: Vec<(String, Arc<dyn Codec>)>,
    smart_null: bool,
    hooks: Option<Arc<dyn FakeHooks>>,
}

impl Schema {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Collection the documents of this type are stored in.
    ///
    /// Embedded schemas are never stored on their own.
    pub fn collection(&self) -> OdmResult<&str> {
        self.collection.as_deref().ok_or_else(|| {
            OdmError::Protocol(format!("{} is an embedded schema without a collection", self.name))
        })
    }

    pub fn is_embedded(&self) -> bool {
        self.collection.is_none()
    }

    /// Fields in declaration order, inherited fields first.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Arc<dyn Codec>)> {
        self.fields.iter().map(|(name, codec)| (name.as_str(), codec))
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.field(name).is_some()
    }

    pub fn field(&self, name: &str) -> Option<&Arc<dyn Codec>> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, codec)| codec)
    }

    /// Codec of `name`, or [`OdmError::UnknownField`].
    pub fn codec(&self, name: &str) -> OdmResult<&Arc<dyn Codec>> {
        self.field(name).ok_or_else(|| OdmError::UnknownField {
            schema: self.name.clone(),
            field: name.to_string(),
        })
    }

    /// Whether reads of unset fields without a default yield `Null`.
    pub fn smart_null(&self) -> bool {
        self.smart_null
    }

    pub fn hooks(&self) -> Option<&Arc<dyn FakeHooks>> {
        self.hooks.as_ref()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("collection", &self.collection)
            .field("fields", &self.field_names())
            .field("smart_null", &self.smart_null)
            .finish()
    }
}

/// Builder for [`Schema`].
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    /// A root document type stored in `collection`, with an implicit `_id`.
    pub fn document(name: impl Into<String>, collection: impl Into<String>) -> Self {
        let mut builder = Self::new(name.into(), Some(collection.into()));
        builder
            .schema
            .fields
            .push((ID_FIELD.to_string(), Arc::new(ObjectIdCodec::new())));
        builder
    }

    /// A type that only ever lives inside another document.
    pub fn embedded(name: impl Into<String>) -> Self {
        Self::new(name.into(), None)
    }

    fn new(name: String, collection: Option<String>) -> Self {
        Self {
            schema: Schema {
                name,
                collection,
                fields: Vec::new(),
                smart_null: false,
                hooks: None,
            },
        }
    }

    /// Copy every field of `parent`, giving each its own codec instance.
    ///
    /// The parent's `_id` is skipped; root builders already declare one.
    pub fn extends(mut self, parent: &Schema) -> Self {
        for (name, codec) in &parent.fields {
            if name == ID_FIELD {
                continue;
            }
            self = self.put(name.clone(), codec.clone_codec());
        }
        if self.schema.hooks.is_none() {
            self.schema.hooks = parent.hooks.clone();
        }
        self.schema.smart_null |= parent.smart_null;
        self
    }

    /// Declare a field. Redeclaring a name replaces its codec in place.
    pub fn field(self, name: impl Into<String>, codec: impl Codec + 'static) -> Self {
        self.put(name.into(), Arc::new(codec))
    }

    /// Declare a field with an already shared codec.
    pub fn field_arc(self, name: impl Into<String>, codec: Arc<dyn Codec>) -> Self {
        self.put(name.into(), codec)
    }

    fn put(mut self, name: String, codec: Arc<dyn Codec>) -> Self {
        match self.schema.fields.iter_mut().find(|(field, _)| *field == name) {
            Some(slot) => slot.1 = codec,
            None => self.schema.fields.push((name, codec)),
        }
        self
    }

    pub fn smart_null(mut self, enabled: bool) -> Self {
        self.schema.smart_null = enabled;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn FakeHooks>) -> Self {
        self.schema.hooks = Some(hooks);
        self
    }

    pub fn build(self) -> Arc<Schema> {
        Arc::new(self.schema)
    }
}

//! In-memory field values.
//!
//! Scalars are held by value. Composite values (embedded documents,
//! containers, references) are shared handles: cloning a `Value` that holds
//! one yields the same underlying object, so mutating the clone mutates the
//! field it was read from.

use std::fmt;

use docmap_types::{ObjectId, Raw};

use crate::containers::{List, Map, Set};
use crate::document::Document;
use crate::reference::{Reference, ReferenceList};

/// A decoded (or about-to-be-normalized) field value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Id(ObjectId),
    /// Untyped storable value, produced by the raw passthrough codec.
    Raw(Raw),
    /// Literal sequence accepted as input by container and reference-list codecs.
    Array(Vec<Value>),
    /// Literal key/value pairs accepted as input by map and embedded codecs.
    Pairs(Vec<(Value, Value)>),
    Document(Document),
    List(List),
    Set(Set),
    Map(Map),
    Reference(Reference),
    ReferenceList(ReferenceList),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::Id(_) => "objectid",
            Self::Raw(_) => "raw",
            Self::Array(_) => "array",
            Self::Pairs(_) => "pairs",
            Self::Document(_) => "document",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Map(_) => "map",
            Self::Reference(_) => "reference",
            Self::ReferenceList(_) => "reference_list",
        }
    }

    /// Build an array literal from anything convertible to values.
    pub fn array<I, T>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::Array(items.into_iter().map(Into::into).collect())
    }

    /// Build a pairs literal from anything convertible to values.
    pub fn pairs<I, K, V>(items: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        Self::Pairs(
            items
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<ObjectId> {
        match self {
            Self::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_document(&self) -> Option<&Document> {
        match self {
            Self::Document(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&Set> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_reference(&self) -> Option<&Reference> {
        match self {
            Self::Reference(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_reference_list(&self) -> Option<&ReferenceList> {
        match self {
            Self::ReferenceList(r) => Some(r),
            _ => None,
        }
    }

    /// Storable form of a scalar value; `None` for composites.
    pub fn to_scalar_raw(&self) -> Option<Raw> {
        Some(match self {
            Self::Null => Raw::Null,
            Self::Bool(b) => Raw::Bool(*b),
            Self::Int(i) => Raw::Int(*i),
            Self::Float(f) => Raw::Float(*f),
            Self::Str(s) => Raw::Str(s.clone()),
            Self::Bytes(b) => Raw::Bytes(b.clone()),
            Self::Id(id) => Raw::Id(*id),
            Self::Raw(raw) => raw.clone(),
            _ => return None,
        })
    }

    /// Decoded form of a storable scalar; mappings and sequences stay raw.
    pub fn from_scalar_raw(raw: &Raw) -> Self {
        match raw {
            Raw::Null => Self::Null,
            Raw::Bool(b) => Self::Bool(*b),
            Raw::Int(i) => Self::Int(*i),
            Raw::Float(f) => Self::Float(*f),
            Raw::Str(s) => Self::Str(s.clone()),
            Raw::Bytes(b) => Self::Bytes(b.clone()),
            Raw::Id(id) => Self::Id(*id),
            Raw::Doc(_) | Raw::List(_) => Self::Raw(raw.clone()),
        }
    }

    /// Embedded documents held by this value: itself, or the document items
    /// of a container.
    pub(crate) fn child_documents(&self) -> Vec<Document> {
        let items = match self {
            Self::Document(d) => return vec![d.clone()],
            Self::List(l) => l.to_vec(),
            Self::Set(s) => s.to_vec(),
            Self::Map(m) => m.values(),
            _ => return Vec::new(),
        };
        items
            .into_iter()
            .filter_map(|item| item.as_document().cloned())
            .collect()
    }

    /// Hang a composite value under `name` of `parent`. Scalars ignore this.
    pub(crate) fn attach(&self, parent: &Document, name: &str) {
        match self {
            Self::Document(d) => d.set_parent(parent, name),
            Self::List(l) => l.attach(parent, name),
            Self::Set(s) => s.attach(parent, name),
            Self::Map(m) => m.attach(parent, name),
            Self::Reference(r) => r.attach(parent, name),
            Self::ReferenceList(r) => r.attach(parent, name),
            _ => {}
        }
    }

    /// Cut a composite value loose from the field it was stored in.
    pub(crate) fn detach(&self) {
        match self {
            Self::Document(d) => d.detach(),
            Self::List(l) => l.detach(),
            Self::Set(s) => s.detach(),
            Self::Map(m) => m.detach(),
            Self::Reference(r) => r.detach(),
            Self::ReferenceList(r) => r.detach(),
            _ => {}
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Id(a), Self::Id(b)) => a == b,
            (Self::Raw(a), Self::Raw(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Pairs(a), Self::Pairs(b)) => a == b,
            (Self::Document(a), Self::Document(b)) => a.ptr_eq(b),
            (Self::List(a), Self::List(b)) => a.to_vec() == b.to_vec(),
            (Self::Set(a), Self::Set(b)) => a.to_vec() == b.to_vec(),
            (Self::Map(a), Self::Map(b)) => a.entries() == b.entries(),
            (Self::Reference(a), Self::Reference(b)) => {
                a.id() == b.id() && a.target().name() == b.target().name()
            }
            (Self::ReferenceList(a), Self::ReferenceList(b)) => a.ids() == b.ids(),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(i) => write!(f, "Int({i})"),
            Self::Float(x) => write!(f, "Float({x})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            Self::Id(id) => write!(f, "Id({id})"),
            Self::Raw(raw) => write!(f, "Raw({raw})"),
            Self::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Self::Pairs(items) => f.debug_tuple("Pairs").field(items).finish(),
            Self::Document(d) => write!(f, "{d:?}"),
            Self::List(l) => write!(f, "{l:?}"),
            Self::Set(s) => write!(f, "{s:?}"),
            Self::Map(m) => write!(f, "{m:?}"),
            Self::Reference(r) => write!(f, "{r:?}"),
            Self::ReferenceList(r) => write!(f, "{r:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Self::Id(v)
    }
}

impl From<Raw> for Value {
    fn from(v: Raw) -> Self {
        Self::Raw(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Self::Array(v)
    }
}

impl From<Document> for Value {
    fn from(v: Document) -> Self {
        Self::Document(v)
    }
}

impl From<&Document> for Value {
    fn from(v: &Document) -> Self {
        Self::Document(v.clone())
    }
}

impl From<List> for Value {
    fn from(v: List) -> Self {
        Self::List(v)
    }
}

impl From<Set> for Value {
    fn from(v: Set) -> Self {
        Self::Set(v)
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Self::Map(v)
    }
}

impl From<Reference> for Value {
    fn from(v: Reference) -> Self {
        Self::Reference(v)
    }
}

impl From<ReferenceList> for Value {
    fn from(v: ReferenceList) -> Self {
        Self::ReferenceList(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

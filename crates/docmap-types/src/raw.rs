use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map as JsonMap, Number, Value as JsonValue};

use crate::error::TypeError;
use crate::object::ObjectId;

/// A storable record: field name to primitive value.
pub type RawDoc = BTreeMap<String, Raw>;

/// A primitive value as the storage collaborator sees it.
///
/// This is the closed set of shapes a record may contain. Conversions to and
/// from `serde_json::Value` use the extended-JSON convention for the two
/// variants JSON cannot express: `{"$oid": "<hex>"}` for identifiers and
/// `{"$binary": "<hex>"}` for byte strings.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Raw {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Id(ObjectId),
    Doc(RawDoc),
    List(Vec<Raw>),
}

impl Raw {
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
            Self::Doc(_) => "document",
            Self::List(_) => "list",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_doc(&self) -> Option<&RawDoc> {
        match self {
            Self::Doc(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_doc_mut(&mut self) -> Option<&mut RawDoc> {
        match self {
            Self::Doc(doc) => Some(doc),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&Vec<Raw>> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<ObjectId> {
        match self {
            Self::Id(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Build a `Raw` from a JSON value.
    pub fn from_json(value: JsonValue) -> Result<Self, TypeError> {
        Ok(match value {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => Self::Float(
                    n.as_f64()
                        .ok_or_else(|| TypeError::UnsupportedJson(n.to_string()))?,
                ),
            },
            JsonValue::String(s) => Self::Str(s),
            JsonValue::Array(items) => Self::List(
                items
                    .into_iter()
                    .map(Self::from_json)
                    .collect::<Result<_, _>>()?,
            ),
            JsonValue::Object(map) => {
                if map.len() == 1 {
                    if let Some(JsonValue::String(hex)) = map.get("$oid") {
                        return Ok(Self::Id(ObjectId::from_hex(hex)?));
                    }
                    if let Some(JsonValue::String(hex)) = map.get("$binary") {
                        let bytes =
                            hex::decode(hex).map_err(|e| TypeError::InvalidHex(e.to_string()))?;
                        return Ok(Self::Bytes(bytes));
                    }
                }
                let mut doc = RawDoc::new();
                for (key, value) in map {
                    doc.insert(key, Self::from_json(value)?);
                }
                Self::Doc(doc)
            }
        })
    }

    /// Render this value as JSON.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(i) => JsonValue::Number((*i).into()),
            Self::Float(f) => Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::Str(s) => JsonValue::String(s.clone()),
            Self::Bytes(b) => {
                let mut map = JsonMap::new();
                map.insert("$binary".into(), JsonValue::String(hex::encode(b)));
                JsonValue::Object(map)
            }
            Self::Id(id) => {
                let mut map = JsonMap::new();
                map.insert("$oid".into(), JsonValue::String(id.to_hex()));
                JsonValue::Object(map)
            }
            Self::Doc(doc) => JsonValue::Object(
                doc.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
        }
    }
}

impl fmt::Display for Raw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Raw {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Raw {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Raw {
    fn from(v: i32) -> Self {
        Self::Int(v as i64)
    }
}

impl From<f64> for Raw {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Raw {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Raw {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<ObjectId> for Raw {
    fn from(v: ObjectId) -> Self {
        Self::Id(v)
    }
}

impl From<RawDoc> for Raw {
    fn from(v: RawDoc) -> Self {
        Self::Doc(v)
    }
}

impl From<Vec<Raw>> for Raw {
    fn from(v: Vec<Raw>) -> Self {
        Self::List(v)
    }
}

impl TryFrom<JsonValue> for Raw {
    type Error = TypeError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        Self::from_json(value)
    }
}

/// Build a [`RawDoc`] from a JSON object literal.
///
/// Non-object input yields an error rather than an empty document.
pub fn raw_doc(value: JsonValue) -> Result<RawDoc, TypeError> {
    match Raw::from_json(value)? {
        Raw::Doc(doc) => Ok(doc),
        other => Err(TypeError::UnsupportedJson(format!(
            "expected an object, got {}",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn integers_stay_integers() {
        assert_eq!(Raw::from_json(json!(13)).unwrap(), Raw::Int(13));
        assert_eq!(Raw::from_json(json!(1.5)).unwrap(), Raw::Float(1.5));
    }

    #[test]
    fn extended_json_markers() {
        let id = ObjectId::from_bytes([1; 12]);
        let raw = Raw::from_json(json!({"$oid": id.to_hex()})).unwrap();
        assert_eq!(raw, Raw::Id(id));

        let raw = Raw::from_json(json!({"$binary": "0102"})).unwrap();
        assert_eq!(raw, Raw::Bytes(vec![1, 2]));
    }

    #[test]
    fn nested_documents_convert_both_ways() {
        let value = json!({"a": {"b": [1, "x", null]}, "c": true});
        let raw = Raw::from_json(value.clone()).unwrap();
        assert_eq!(raw.to_json(), value);
    }

    #[test]
    fn oid_with_extra_keys_is_a_plain_document() {
        let raw = Raw::from_json(json!({"$oid": "x", "other": 1})).unwrap();
        assert!(raw.as_doc().is_some());
    }

    #[test]
    fn raw_doc_requires_object() {
        assert!(raw_doc(json!([1, 2])).is_err());
        let doc = raw_doc(json!({"i": 1})).unwrap();
        assert_eq!(doc.get("i"), Some(&Raw::Int(1)));
    }

    #[test]
    fn type_names() {
        assert_eq!(Raw::Null.type_name(), "null");
        assert_eq!(Raw::List(vec![]).type_name(), "list");
        assert_eq!(Raw::Id(ObjectId::new()).type_name(), "objectid");
    }
}

//! Whole-document conversion between [`Document`] and storable records.

use std::sync::Arc;

use docmap_store::Projection;
use docmap_types::{path, Raw, RawDoc};

use crate::document::Document;
use crate::error::{OdmError, OdmResult};
use crate::markers::FieldState;
use crate::schema::{Schema, ID_FIELD};
use crate::value::Value;

/// Field filters for [`to_storage`].
///
/// `include` and `exclude` take dotted paths; a path into an embedded field
/// filters the embedded document. With `skip_not_loaded`, fields (or whole
/// embedded branches) that hold not-loaded data are left out instead of
/// failing the conversion.
#[derive(Clone, Debug, Default)]
pub struct EncodeOptions {
    pub include: Option<Vec<String>>,
    pub exclude: Vec<String>,
    pub skip_not_loaded: bool,
}

impl EncodeOptions {
    pub fn include<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.include = Some(paths.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn skip_not_loaded(mut self) -> Self {
        self.skip_not_loaded = true;
        self
    }

    /// Options for the value of `name`, or `None` when it is filtered out.
    /// Nested documents are always encoded strictly.
    fn narrow(&self, name: &str) -> Option<EncodeOptions> {
        if self.exclude.iter().any(|p| p == name) {
            return None;
        }
        let include = match &self.include {
            None => None,
            Some(paths) if paths.iter().any(|p| p == name) => None,
            Some(paths) => {
                let nested = sub_paths(paths, name);
                if nested.is_empty() {
                    return None;
                }
                Some(nested)
            }
        };
        Some(EncodeOptions {
            include,
            exclude: sub_paths(&self.exclude, name),
            skip_not_loaded: false,
        })
    }
}

fn sub_paths(paths: &[String], name: &str) -> Vec<String> {
    paths
        .iter()
        .filter_map(|p| p.strip_prefix(name)?.strip_prefix('.'))
        .map(str::to_string)
        .collect()
}

/// Storable form of `doc`, fields in schema order.
///
/// Unset fields without a default are omitted. A not-loaded field fails with
/// [`OdmError::NotLoaded`] carrying its dotted path, unless
/// [`EncodeOptions::skip_not_loaded`] is set.
pub fn to_storage(doc: &Document, options: &EncodeOptions) -> OdmResult<RawDoc> {
    let mut out = RawDoc::new();
    for (name, codec) in doc.schema().fields() {
        let Some(nested) = options.narrow(name) else {
            continue;
        };
        let value = match doc.peek(name)? {
            FieldState::Set(value) => value,
            FieldState::NotSet => continue,
            FieldState::NotLoaded if options.skip_not_loaded => continue,
            FieldState::NotLoaded => return Err(OdmError::NotLoaded(name.to_string())),
        };
        let encoded = match &value {
            Value::Document(child) => to_storage(child, &nested).map(Raw::Doc),
            value => codec.encode(value),
        };
        match encoded {
            Ok(raw) => {
                out.insert(name.to_string(), raw);
            }
            Err(OdmError::NotLoaded(_)) if options.skip_not_loaded => continue,
            Err(OdmError::NotLoaded(inner)) => {
                return Err(OdmError::NotLoaded(path::join(name, &inner)))
            }
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

/// Document of `schema` over a stored record. Fields named in `not_loaded`
/// (dotted paths allowed) read as not loaded.
pub fn from_storage(schema: &Arc<Schema>, record: RawDoc, not_loaded: &[&str]) -> OdmResult<Document> {
    let doc = Document::new(Arc::clone(schema));
    doc.replace_raw(record, not_loaded)?;
    Ok(doc)
}

/// Dotted paths of `schema` that a read with `projection` leaves out.
pub fn not_loaded_for(schema: &Schema, projection: &Projection) -> Vec<String> {
    match projection {
        Projection::All => Vec::new(),
        Projection::Exclude(paths) => paths
            .iter()
            .filter(|p| p.as_str() != ID_FIELD)
            .cloned()
            .collect(),
        Projection::Include(paths) => {
            let paths: Vec<&str> = paths.iter().map(String::as_str).collect();
            left_out(schema, &paths, "")
        }
    }
}

fn left_out(schema: &Schema, include: &[&str], prefix: &str) -> Vec<String> {
    let mut out = Vec::new();
    for (name, codec) in schema.fields() {
        if name == ID_FIELD || include.contains(&name) {
            continue;
        }
        let nested: Vec<&str> = include
            .iter()
            .filter_map(|p| p.strip_prefix(name)?.strip_prefix('.'))
            .collect();
        let full = path::join(prefix, name);
        match codec.embedded_schema() {
            Some(sub) if !nested.is_empty() => out.extend(left_out(sub, &nested, &full)),
            _ => out.push(full),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{EmbeddedCodec, IntCodec, ListCodec, StrCodec};
    use crate::schema::SchemaBuilder;
    use docmap_types::raw_doc;
    use serde_json::json;

    fn inner() -> Arc<Schema> {
        SchemaBuilder::embedded("Inner")
            .field("x", IntCodec::new())
            .field("y", IntCodec::new())
            .build()
    }

    fn schema() -> Arc<Schema> {
        SchemaBuilder::document("Doc", "docs")
            .field("i", IntCodec::new())
            .field("s", StrCodec::new().with_default("d").unwrap())
            .field("e", EmbeddedCodec::new(inner()))
            .field("tags", ListCodec::new(StrCodec::new()))
            .build()
    }

    fn record(value: serde_json::Value) -> RawDoc {
        raw_doc(value).unwrap()
    }

    #[test]
    fn unset_fields_are_omitted_and_defaults_written() {
        let doc = Document::new(schema());
        doc.set("i", 1).unwrap();
        let out = to_storage(&doc, &EncodeOptions::default()).unwrap();
        assert_eq!(
            out,
            record(json!({"i": 1, "s": "d", "tags": []}))
        );
    }

    #[test]
    fn round_trip_through_storage() {
        let stored = record(json!({"i": 3, "s": "z", "e": {"x": 1, "y": 2}, "tags": ["a", "b"]}));
        let doc = from_storage(&schema(), stored.clone(), &[]).unwrap();
        assert_eq!(to_storage(&doc, &EncodeOptions::default()).unwrap(), stored);
    }

    #[test]
    fn not_loaded_fails_with_its_path() {
        let doc = from_storage(&schema(), record(json!({"i": 1, "e": {"x": 1}})), &["e.y"]).unwrap();
        let err = to_storage(&doc, &EncodeOptions::default()).unwrap_err();
        assert!(matches!(err, OdmError::NotLoaded(p) if p == "e.y"));
    }

    #[test]
    fn skip_not_loaded_drops_whole_branches() {
        let doc = from_storage(
            &schema(),
            record(json!({"i": 1, "e": {"x": 1}, "tags": []})),
            &["e.y", "s"],
        )
        .unwrap();
        let out = to_storage(&doc, &EncodeOptions::default().skip_not_loaded()).unwrap();
        assert_eq!(out, record(json!({"i": 1, "tags": []})));
    }

    #[test]
    fn dotted_filters_reach_into_embedded() {
        let doc = from_storage(
            &schema(),
            record(json!({"i": 1, "s": "a", "e": {"x": 1, "y": 2}, "tags": []})),
            &[],
        )
        .unwrap();
        let only = to_storage(&doc, &EncodeOptions::default().include(["i", "e.x"])).unwrap();
        assert_eq!(only, record(json!({"i": 1, "e": {"x": 1}})));
        let without = to_storage(&doc, &EncodeOptions::default().exclude(["e.y", "tags", "s"])).unwrap();
        assert_eq!(without, record(json!({"i": 1, "e": {"x": 1}})));
    }

    #[test]
    fn include_projection_marks_the_rest_not_loaded() {
        let projection = Projection::include(["i", "e.x"]);
        assert_eq!(
            not_loaded_for(&schema(), &projection),
            vec!["s", "e.y", "tags"]
        );
        let projection = Projection::include(["tags.0"]);
        assert_eq!(not_loaded_for(&schema(), &projection), vec!["i", "s", "e", "tags"]);
    }

    #[test]
    fn exclude_projection_marks_its_paths() {
        let projection = Projection::exclude(["e.y", "_id"]);
        assert_eq!(not_loaded_for(&schema(), &projection), vec!["e.y"]);
        assert!(not_loaded_for(&schema(), &Projection::All).is_empty());
    }
}

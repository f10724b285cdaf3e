//! Dotted paths addressing nested fields and items.
//!
//! A path like `profile.tags.2` walks mapping keys and, where the current
//! value is a sequence, numeric indices.

use crate::error::TypeError;
use crate::raw::{Raw, RawDoc};

/// Join a parent path and a child name. An empty parent yields the name.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else if name.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

/// Split off the first segment of a path.
pub fn split_first(path: &str) -> (&str, Option<&str>) {
    match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    }
}

fn validate(path: &str) -> Result<(), TypeError> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(TypeError::InvalidPath(path.to_string()));
    }
    Ok(())
}

fn child<'a>(value: &'a Raw, segment: &str) -> Option<&'a Raw> {
    match value {
        Raw::Doc(doc) => doc.get(segment),
        Raw::List(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn child_mut<'a>(value: &'a mut Raw, segment: &str) -> Option<&'a mut Raw> {
    match value {
        Raw::Doc(doc) => doc.get_mut(segment),
        Raw::List(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(move |i| items.get_mut(i)),
        _ => None,
    }
}

/// Look up the value at `path`.
pub fn get<'a>(doc: &'a RawDoc, path: &str) -> Option<&'a Raw> {
    let (head, rest) = split_first(path);
    let mut current = doc.get(head)?;
    if let Some(rest) = rest {
        for segment in rest.split('.') {
            current = child(current, segment)?;
        }
    }
    Some(current)
}

/// Mutable lookup of the value at `path`.
pub fn get_mut<'a>(doc: &'a mut RawDoc, path: &str) -> Option<&'a mut Raw> {
    let (head, rest) = split_first(path);
    let mut current = doc.get_mut(head)?;
    if let Some(rest) = rest {
        for segment in rest.split('.') {
            current = child_mut(current, segment)?;
        }
    }
    Some(current)
}

/// Mutable slot at `path`, creating intermediate documents as needed.
///
/// A missing leaf is created as `Null`. Walking through a scalar, or through a
/// sequence with a non-numeric or out-of-range segment, is an error.
pub fn entry<'a>(doc: &'a mut RawDoc, path: &str) -> Result<&'a mut Raw, TypeError> {
    validate(path)?;
    let (head, rest) = split_first(path);
    let mut current = doc.entry(head.to_string()).or_insert(Raw::Null);
    if let Some(rest) = rest {
        for segment in rest.split('.') {
            if current.is_null() {
                *current = Raw::Doc(RawDoc::new());
            }
            current = match current {
                Raw::Doc(inner) => inner.entry(segment.to_string()).or_insert(Raw::Null),
                Raw::List(items) => segment
                    .parse::<usize>()
                    .ok()
                    .and_then(move |i| items.get_mut(i))
                    .ok_or_else(|| TypeError::InvalidPath(path.to_string()))?,
                _ => return Err(TypeError::InvalidPath(path.to_string())),
            };
        }
    }
    Ok(current)
}

/// Set the value at `path`, creating intermediate documents.
pub fn set(doc: &mut RawDoc, path: &str, value: Raw) -> Result<(), TypeError> {
    *entry(doc, path)? = value;
    Ok(())
}

/// Remove the value at `path`, returning it if it existed.
///
/// Removing from a sequence by index sets the slot to `Null`, matching how
/// document stores treat `$unset` on array elements.
pub fn remove(doc: &mut RawDoc, path: &str) -> Option<Raw> {
    match path.rsplit_once('.') {
        None => doc.remove(path),
        Some((parent, last)) => match get_mut(doc, parent)? {
            Raw::Doc(inner) => inner.remove(last),
            Raw::List(items) => {
                let index = last.parse::<usize>().ok()?;
                items.get_mut(index).map(std::mem::take)
            }
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::raw_doc;
    use serde_json::json;

    #[test]
    fn join_handles_empty_parts() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a", ""), "a");
        assert_eq!(join("a.b", "c"), "a.b.c");
    }

    #[test]
    fn get_walks_documents_and_lists() {
        let doc = raw_doc(json!({"a": {"b": [10, 20, {"c": 3}]}})).unwrap();
        assert_eq!(get(&doc, "a.b.1"), Some(&Raw::Int(20)));
        assert_eq!(get(&doc, "a.b.2.c"), Some(&Raw::Int(3)));
        assert_eq!(get(&doc, "a.x"), None);
        assert_eq!(get(&doc, "a.b.9"), None);
    }

    #[test]
    fn set_creates_intermediates() {
        let mut doc = RawDoc::new();
        set(&mut doc, "a.b.c", Raw::Int(1)).unwrap();
        assert_eq!(Raw::Doc(doc).to_json(), json!({"a": {"b": {"c": 1}}}));
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut doc = raw_doc(json!({"a": 1})).unwrap();
        assert!(set(&mut doc, "a.b", Raw::Int(2)).is_err());
        assert!(set(&mut doc, "", Raw::Int(2)).is_err());
        assert!(set(&mut doc, "a..b", Raw::Int(2)).is_err());
    }

    #[test]
    fn remove_nested_key() {
        let mut doc = raw_doc(json!({"a": {"b": 1, "c": 2}})).unwrap();
        assert_eq!(remove(&mut doc, "a.b"), Some(Raw::Int(1)));
        assert_eq!(Raw::Doc(doc).to_json(), json!({"a": {"c": 2}}));
    }

    #[test]
    fn remove_list_index_nulls_slot() {
        let mut doc = raw_doc(json!({"l": [1, 2, 3]})).unwrap();
        assert_eq!(remove(&mut doc, "l.1"), Some(Raw::Int(2)));
        assert_eq!(Raw::Doc(doc).to_json(), json!({"l": [1, null, 3]}));
    }
}

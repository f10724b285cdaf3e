//! Query, projection, and update vocabulary shared by every backend.
//!
//! These are deliberately small: equality and membership criteria, field
//! projections, path-targeted update operators, and a handful of pipeline
//! stages. Richer query builders live outside this crate.

use std::cmp::Ordering;

use docmap_types::{path, ObjectId, Raw, RawDoc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// A single condition on a dotted path.
#[derive(Clone, Debug, PartialEq)]
pub enum Condition {
    /// The value equals (or, for sequences, contains) the operand.
    Eq(String, Raw),
    /// The value equals one of the operands.
    In(String, Vec<Raw>),
    /// The path is present (`true`) or absent (`false`).
    Exists(String, bool),
}

impl Condition {
    fn matches(&self, doc: &RawDoc) -> bool {
        match self {
            Self::Eq(p, expected) => path::get(doc, p).is_some_and(|v| value_matches(v, expected)),
            Self::In(p, options) => path::get(doc, p)
                .is_some_and(|v| options.iter().any(|expected| value_matches(v, expected))),
            Self::Exists(p, present) => path::get(doc, p).is_some() == *present,
        }
    }
}

fn value_matches(actual: &Raw, expected: &Raw) -> bool {
    if actual == expected {
        return true;
    }
    match (actual, expected) {
        (Raw::List(items), other) if !matches!(other, Raw::List(_)) => items.contains(other),
        _ => false,
    }
}

/// Conjunction of conditions. An empty criteria matches every record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Criteria {
    conditions: Vec<Condition>,
}

impl Criteria {
    /// Criteria matching every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match the record with the given `_id`.
    pub fn id(id: ObjectId) -> Self {
        Self::all().eq("_id", Raw::Id(id))
    }

    /// Match records whose `_id` is one of `ids`.
    pub fn id_in(ids: &[ObjectId]) -> Self {
        Self::all().is_in("_id", ids.iter().map(|id| Raw::Id(*id)).collect())
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Raw>) -> Self {
        self.conditions.push(Condition::Eq(path.into(), value.into()));
        self
    }

    pub fn is_in(mut self, path: impl Into<String>, values: Vec<Raw>) -> Self {
        self.conditions.push(Condition::In(path.into(), values));
        self
    }

    pub fn exists(mut self, path: impl Into<String>, present: bool) -> Self {
        self.conditions.push(Condition::Exists(path.into(), present));
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Evaluate against a record.
    pub fn matches(&self, doc: &RawDoc) -> bool {
        self.conditions.iter().all(|c| c.matches(doc))
    }
}

/// Read projection restricting which fields are returned.
///
/// `_id` is always returned by an inclusion projection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    #[default]
    All,
    Include(Vec<String>),
    Exclude(Vec<String>),
}

impl Projection {
    pub fn include<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Include(paths.into_iter().map(Into::into).collect())
    }

    pub fn exclude<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exclude(paths.into_iter().map(Into::into).collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Self::All)
    }

    /// Apply the projection to a stored record.
    pub fn apply(&self, doc: &RawDoc) -> RawDoc {
        match self {
            Self::All => doc.clone(),
            Self::Include(paths) => {
                let mut out = RawDoc::new();
                if let Some(id) = doc.get("_id") {
                    out.insert("_id".into(), id.clone());
                }
                for p in paths {
                    if let Some(value) = path::get(doc, p) {
                        // Paths were just read from a well-formed record.
                        let _ = path::set(&mut out, p, value.clone());
                    }
                }
                out
            }
            Self::Exclude(paths) => {
                let mut out = doc.clone();
                for p in paths {
                    path::remove(&mut out, p);
                }
                out
            }
        }
    }
}

/// A path-targeted update operator.
#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOp {
    Set(String, Raw),
    Unset(String),
    Push(String, Raw),
    Pull(String, Raw),
    AddToSet(String, Raw),
    Inc(String, Raw),
}

impl UpdateOp {
    /// Operator name in the conventional `$op` spelling.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Set(..) => "$set",
            Self::Unset(_) => "$unset",
            Self::Push(..) => "$push",
            Self::Pull(..) => "$pull",
            Self::AddToSet(..) => "$addToSet",
            Self::Inc(..) => "$inc",
        }
    }

    pub fn path(&self) -> &str {
        match self {
            Self::Set(p, _)
            | Self::Unset(p)
            | Self::Push(p, _)
            | Self::Pull(p, _)
            | Self::AddToSet(p, _)
            | Self::Inc(p, _) => p,
        }
    }

    /// Apply to a record. Returns whether the record changed.
    pub fn apply(&self, doc: &mut RawDoc) -> StoreResult<bool> {
        let invalid = |reason: String| StoreError::InvalidUpdate {
            op: self.name(),
            path: self.path().to_string(),
            reason,
        };
        match self {
            Self::Set(p, value) => {
                let slot = path::entry(doc, p)?;
                let changed = slot != value;
                *slot = value.clone();
                Ok(changed)
            }
            Self::Unset(p) => Ok(path::remove(doc, p).is_some()),
            Self::Push(p, value) | Self::AddToSet(p, value) => {
                let slot = path::entry(doc, p)?;
                if slot.is_null() {
                    *slot = Raw::List(Vec::new());
                }
                match slot {
                    Raw::List(items) => {
                        if matches!(self, Self::AddToSet(..)) && items.contains(value) {
                            return Ok(false);
                        }
                        items.push(value.clone());
                        Ok(true)
                    }
                    other => Err(invalid(format!("target is {}", other.type_name()))),
                }
            }
            Self::Pull(p, value) => match path::get_mut(doc, p) {
                None => Ok(false),
                Some(Raw::List(items)) => {
                    let before = items.len();
                    items.retain(|item| item != value);
                    Ok(items.len() != before)
                }
                Some(other) => Err(invalid(format!("target is {}", other.type_name()))),
            },
            Self::Inc(p, by) => {
                let slot = path::entry(doc, p)?;
                let next = match (&*slot, by) {
                    (Raw::Null, Raw::Int(b)) => Raw::Int(*b),
                    (Raw::Null, Raw::Float(b)) => Raw::Float(*b),
                    (Raw::Int(a), Raw::Int(b)) => Raw::Int(
                        a.checked_add(*b)
                            .ok_or_else(|| invalid(format!("{a} + {b} overflows an int")))?,
                    ),
                    (Raw::Int(a), Raw::Float(b)) => Raw::Float(*a as f64 + b),
                    (Raw::Float(a), Raw::Int(b)) => Raw::Float(a + *b as f64),
                    (Raw::Float(a), Raw::Float(b)) => Raw::Float(a + b),
                    (current, by) => {
                        return Err(invalid(format!(
                            "cannot add {} to {}",
                            by.type_name(),
                            current.type_name()
                        )))
                    }
                };
                let changed = *slot != next;
                *slot = next;
                Ok(changed)
            }
        }
    }
}

/// Outcome of a single-document update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub matched: u64,
    pub modified: u64,
}

/// Outcome of a delete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub removed: u64,
}

/// An aggregation pipeline stage.
#[derive(Clone, Debug, PartialEq)]
pub enum Stage {
    Match(Criteria),
    /// Sort by a dotted path; `true` for ascending.
    Sort(String, bool),
    Skip(usize),
    Limit(usize),
    Project(Projection),
}

/// Options passed through to the aggregation backend.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateOptions {
    pub batch_size: Option<usize>,
    pub allow_disk_use: bool,
}

/// Run a pipeline over an in-memory record set.
pub fn run_pipeline(mut docs: Vec<RawDoc>, pipeline: &[Stage]) -> Vec<RawDoc> {
    for stage in pipeline {
        docs = match stage {
            Stage::Match(criteria) => docs.into_iter().filter(|d| criteria.matches(d)).collect(),
            Stage::Sort(p, ascending) => {
                docs.sort_by(|a, b| {
                    let ord = compare(path::get(a, p), path::get(b, p));
                    if *ascending {
                        ord
                    } else {
                        ord.reverse()
                    }
                });
                docs
            }
            Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
            Stage::Limit(n) => docs.into_iter().take(*n).collect(),
            Stage::Project(projection) => docs.iter().map(|d| projection.apply(d)).collect(),
        };
    }
    docs
}

fn compare(a: Option<&Raw>, b: Option<&Raw>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Raw::Int(x), Raw::Int(y)) => x.cmp(y),
            (Raw::Int(x), Raw::Float(y)) => (*x as f64).total_cmp(y),
            (Raw::Float(x), Raw::Int(y)) => x.total_cmp(&(*y as f64)),
            (Raw::Float(x), Raw::Float(y)) => x.total_cmp(y),
            (Raw::Str(x), Raw::Str(y)) => x.cmp(y),
            (Raw::Bool(x), Raw::Bool(y)) => x.cmp(y),
            (Raw::Id(x), Raw::Id(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

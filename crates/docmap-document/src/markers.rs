//! Sentinels for fields without a usable value.

use std::fmt;

use docmap_types::Raw;

use crate::value::Value;

/// Marker for a field excluded by a read projection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct NotLoaded;

impl fmt::Display for NotLoaded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<NotLoaded>")
    }
}

/// Marker for a field that was never assigned and has no default.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct AttributeNotSet;

impl fmt::Display for AttributeNotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<AttributeNotSet>")
    }
}

/// An entry of a document's raw store.
#[derive(Clone, Debug, PartialEq)]
pub enum Slot {
    Loaded(Raw),
    NotLoaded,
}

impl Slot {
    pub fn is_not_loaded(&self) -> bool {
        matches!(self, Self::NotLoaded)
    }
}

impl From<NotLoaded> for Slot {
    fn from(_: NotLoaded) -> Self {
        Self::NotLoaded
    }
}

/// Current state of a field as seen from outside the state store.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldState {
    Set(Value),
    NotLoaded,
    NotSet,
}

impl FieldState {
    pub fn value(self) -> Option<Value> {
        match self {
            Self::Set(v) => Some(v),
            _ => None,
        }
    }
}

impl From<AttributeNotSet> for FieldState {
    fn from(_: AttributeNotSet) -> Self {
        Self::NotSet
    }
}

impl From<NotLoaded> for FieldState {
    fn from(_: NotLoaded) -> Self {
        Self::NotLoaded
    }
}

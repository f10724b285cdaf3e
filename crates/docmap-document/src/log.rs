//! Append-only mutation trail attached to root documents.
//!
//! The log is an audit trail for callers and tests. Save diffs are computed
//! from the state store's `changed` map, never from here.

use docmap_store::UpdateOp;
use docmap_types::ObjectId;

use crate::value::Value;

/// One recorded event.
#[derive(Clone, Debug, PartialEq)]
pub enum LogEntry {
    Insert { id: ObjectId },
    Save { id: ObjectId },
    Reload,
    Remove { id: ObjectId },
    SetField { name: String, value: Value },
    UnsetField { name: String },
    UpdateOne { ops: Vec<UpdateOp> },
    /// A mutation of a nested item, recorded on the root. `path` is the dotted
    /// path from the root to the mutated item.
    ChangeChild {
        path: String,
        name: String,
        entry: Box<LogEntry>,
    },
}

impl LogEntry {
    /// Field name an entry targets, if it targets one.
    pub fn field_name(&self) -> Option<&str> {
        match self {
            Self::SetField { name, .. } | Self::UnsetField { name } => Some(name),
            Self::ChangeChild { name, .. } => Some(name),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Save { .. } => "save",
            Self::Reload => "reload",
            Self::Remove { .. } => "remove",
            Self::SetField { .. } => "set_field",
            Self::UnsetField { .. } => "unset_field",
            Self::UpdateOne { .. } => "update_one",
            Self::ChangeChild { .. } => "change_child",
        }
    }
}

/// Ordered sequence of [`LogEntry`] values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChangeLog {
    entries: Vec<LogEntry>,
}

impl ChangeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Entry kinds in order, handy for assertions.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.entries.iter().map(LogEntry::kind).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_preserves_order() {
        let mut log = ChangeLog::new();
        log.push(LogEntry::SetField {
            name: "i".into(),
            value: Value::Int(1),
        });
        log.push(LogEntry::Reload);
        assert_eq!(log.kinds(), vec!["set_field", "reload"]);
        assert_eq!(log.last(), Some(&LogEntry::Reload));
    }

    #[test]
    fn change_child_exposes_inner_name() {
        let entry = LogEntry::ChangeChild {
            path: "e".into(),
            name: "x".into(),
            entry: Box::new(LogEntry::UnsetField { name: "x".into() }),
        };
        assert_eq!(entry.field_name(), Some("x"));
        assert_eq!(LogEntry::Reload.field_name(), None);
    }
}

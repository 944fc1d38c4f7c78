use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Previous and current versions of a changed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangedRecord {
    /// Document as it was before the change
    pub prev: JsonValue,
    /// Document after the change
    pub next: JsonValue,
}

/// One change notification for a named collection.
///
/// Each slot is independent; a transport normally fills exactly one of them
/// per notification, but consumers must accept any combination.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionDelta {
    /// Document that appeared in the collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub added: Option<JsonValue>,

    /// Document that was modified
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<ChangedRecord>,

    /// Document that left the collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<JsonValue>,
}

impl CollectionDelta {
    /// Delta carrying a newly added document.
    pub fn added(record: JsonValue) -> Self {
        Self {
            added: Some(record),
            ..Self::default()
        }
    }

    /// Delta carrying a document change.
    pub fn changed(prev: JsonValue, next: JsonValue) -> Self {
        Self {
            changed: Some(ChangedRecord { prev, next }),
            ..Self::default()
        }
    }

    /// Delta carrying a removed document.
    pub fn removed(record: JsonValue) -> Self {
        Self {
            removed: Some(record),
            ..Self::default()
        }
    }

    /// Slots that are populated, in `added`, `changed`, `removed` order.
    pub fn kinds(&self) -> Vec<DeltaKind> {
        let mut kinds = Vec::with_capacity(3);
        if self.added.is_some() {
            kinds.push(DeltaKind::Added);
        }
        if self.changed.is_some() {
            kinds.push(DeltaKind::Changed);
        }
        if self.removed.is_some() {
            kinds.push(DeltaKind::Removed);
        }
        kinds
    }

    /// True when no slot is populated.
    pub fn is_empty(&self) -> bool {
        self.added.is_none() && self.changed.is_none() && self.removed.is_none()
    }
}

/// Slot of a [`CollectionDelta`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeltaKind {
    Added,
    Changed,
    Removed,
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeltaKind::Added => write!(f, "added"),
            DeltaKind::Changed => write!(f, "changed"),
            DeltaKind::Removed => write!(f, "removed"),
        }
    }
}

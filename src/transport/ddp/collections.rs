//! Client-side document cache and collection observers.
//!
//! DDP sends field-level changes. Observers want whole records, so the
//! transport keeps the current document of every id it has seen and turns
//! each frame into a [`CollectionDelta`] carrying full documents.

use super::messages::Fields;
use crate::{
    models::CollectionDelta,
    transport::DeltaCallback,
};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashMap;

const ID_FIELD: &str = "id";

fn document(id: &str, fields: Fields) -> Map<String, JsonValue> {
    let mut doc = fields;
    doc.insert(ID_FIELD.to_string(), JsonValue::String(id.to_string()));
    doc
}

fn bare_document(id: &str) -> Map<String, JsonValue> {
    document(id, Map::new())
}

/// Documents of every collection, keyed by collection name then document id.
#[derive(Debug, Default)]
pub(crate) struct DocumentCache {
    collections: HashMap<String, HashMap<String, Map<String, JsonValue>>>,
}

impl DocumentCache {
    /// Store a new document and return the `added` delta.
    ///
    /// A repeated `added` for a known id replaces the document.
    pub(crate) fn added(&mut self, collection: &str, id: &str, fields: Option<Fields>) -> CollectionDelta {
        let doc = document(id, fields.unwrap_or_default());
        self.collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), doc.clone());
        CollectionDelta::added(JsonValue::Object(doc))
    }

    /// Apply a field change and return the `changed` delta with the document
    /// before and after. Unknown ids start from an empty document.
    pub(crate) fn changed(
        &mut self,
        collection: &str,
        id: &str,
        fields: Option<Fields>,
        cleared: Option<Vec<String>>,
    ) -> CollectionDelta {
        let docs = self.collections.entry(collection.to_string()).or_default();
        let current = docs.entry(id.to_string()).or_insert_with(|| bare_document(id));
        let prev = current.clone();

        for (key, value) in fields.unwrap_or_default() {
            if key != ID_FIELD {
                current.insert(key, value);
            }
        }
        for key in cleared.unwrap_or_default() {
            if key != ID_FIELD {
                current.remove(&key);
            }
        }

        CollectionDelta::changed(JsonValue::Object(prev), JsonValue::Object(current.clone()))
    }

    /// Drop a document and return the `removed` delta with its last state.
    pub(crate) fn removed(&mut self, collection: &str, id: &str) -> CollectionDelta {
        let prev = self
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
            .unwrap_or_else(|| bare_document(id));
        CollectionDelta::removed(JsonValue::Object(prev))
    }

    /// Number of cached documents in a collection.
    #[cfg(test)]
    pub(crate) fn len(&self, collection: &str) -> usize {
        self.collections.get(collection).map_or(0, HashMap::len)
    }

    pub(crate) fn clear(&mut self) {
        self.collections.clear();
    }
}

/// Registered observers. Ids are never reused.
#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: u64,
    entries: Vec<(u64, String, DeltaCallback)>,
}

impl ObserverRegistry {
    pub(crate) fn register(&mut self, collection: &str, on_change: DeltaCallback) -> u64 {
        self.next_id += 1;
        self.entries.push((self.next_id, collection.to_string(), on_change));
        self.next_id
    }

    /// Returns `false` when the observer was already gone.
    pub(crate) fn unregister(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry_id, _, _)| *entry_id != id);
        self.entries.len() != before
    }

    /// Callbacks for a collection, in registration order.
    pub(crate) fn callbacks_for(&self, collection: &str) -> Vec<DeltaCallback> {
        self.entries
            .iter()
            .filter(|(_, name, _)| name == collection)
            .map(|(_, _, cb)| cb.clone())
            .collect()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn fields(value: JsonValue) -> Option<Fields> {
        match value {
            JsonValue::Object(map) => Some(map),
            _ => None,
        }
    }

    #[test]
    fn test_added_includes_id() {
        let mut cache = DocumentCache::default();
        let delta = cache.added("sensors", "a", fields(json!({"temp": 20})));
        assert_eq!(delta, CollectionDelta::added(json!({"id": "a", "temp": 20})));
        assert_eq!(cache.len("sensors"), 1);
    }

    #[test]
    fn test_changed_carries_prev_and_next() {
        let mut cache = DocumentCache::default();
        cache.added("sensors", "a", fields(json!({"temp": 20, "unit": "C", "note": "x"})));

        let delta = cache.changed(
            "sensors",
            "a",
            fields(json!({"temp": 21})),
            Some(vec!["note".to_string()]),
        );

        assert_eq!(
            delta,
            CollectionDelta::changed(
                json!({"id": "a", "temp": 20, "unit": "C", "note": "x"}),
                json!({"id": "a", "temp": 21, "unit": "C"}),
            )
        );
    }

    #[test]
    fn test_changed_on_unknown_document() {
        let mut cache = DocumentCache::default();
        let delta = cache.changed("alerts", "z", fields(json!({"level": 2})), None);
        assert_eq!(
            delta,
            CollectionDelta::changed(json!({"id": "z"}), json!({"id": "z", "level": 2}))
        );
    }

    #[test]
    fn test_fields_cannot_overwrite_id() {
        let mut cache = DocumentCache::default();
        cache.added("c", "a", None);
        let delta = cache.changed("c", "a", fields(json!({"id": "b"})), Some(vec!["id".into()]));
        assert_eq!(delta.changed.unwrap().next, json!({"id": "a"}));
    }

    #[test]
    fn test_removed_returns_last_state() {
        let mut cache = DocumentCache::default();
        cache.added("queue", "x", fields(json!({"state": "added"})));

        let delta = cache.removed("queue", "x");
        assert_eq!(delta, CollectionDelta::removed(json!({"id": "x", "state": "added"})));
        assert_eq!(cache.len("queue"), 0);

        let unknown = cache.removed("queue", "y");
        assert_eq!(unknown, CollectionDelta::removed(json!({"id": "y"})));
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut cache = DocumentCache::default();
        cache.added("a", "1", None);
        cache.added("b", "2", None);
        cache.clear();
        assert_eq!(cache.len("a"), 0);
        assert_eq!(cache.len("b"), 0);
    }

    #[test]
    fn test_observer_registry() {
        let mut registry = ObserverRegistry::default();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let s1 = seen.clone();
        let first = registry.register("sensors", Arc::new(move |_| s1.lock().unwrap().push(1)));
        let s2 = seen.clone();
        registry.register("sensors", Arc::new(move |_| s2.lock().unwrap().push(2)));
        registry.register("alerts", Arc::new(|_| {}));

        for cb in registry.callbacks_for("sensors") {
            cb(CollectionDelta::removed(json!({"id": "a"})));
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);

        assert!(registry.unregister(first));
        assert!(!registry.unregister(first));
        assert_eq!(registry.callbacks_for("sensors").len(), 1);
        assert_eq!(registry.len(), 2);
    }
}

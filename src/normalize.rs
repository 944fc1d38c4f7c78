//! Identifier normalization for inbound records.
//!
//! Some server-side writers prefix 24-character hexadecimal object ids with a
//! `-`, producing 25-character ids that no longer match the canonical form the
//! rest of the catalogue uses. This module strips that marker so consumers
//! always see the canonical id.
//!
//! The correction is pure, total and idempotent: anything that does not look
//! exactly like a marked hex id is passed through untouched.

use crate::models::{ChangedRecord, CollectionDelta};
use serde_json::Value as JsonValue;

/// Field holding the record identifier.
const ID_FIELD: &str = "id";

/// Leading character added to marked ids.
const ID_MARKER: char = '-';

/// Length of a canonical hexadecimal object id.
const CANONICAL_ID_LEN: usize = 24;

/// Return the canonical form of `id` when it is a marked hex id.
fn canonical_id(id: &str) -> Option<&str> {
    let rest = id.strip_prefix(ID_MARKER)?;
    if rest.len() == CANONICAL_ID_LEN && rest.bytes().all(|b| b.is_ascii_hexdigit()) {
        Some(rest)
    } else {
        None
    }
}

/// Correct the identifier of a single record.
///
/// Records that are not objects, have no string `id`, or whose id is not a
/// `-` followed by exactly 24 hex digits are returned unchanged.
pub fn normalize_record(record: JsonValue) -> JsonValue {
    let fixed = match record
        .get(ID_FIELD)
        .and_then(JsonValue::as_str)
        .and_then(canonical_id)
    {
        Some(id) => id.to_string(),
        None => return record,
    };

    let mut record = record;
    if let Some(map) = record.as_object_mut() {
        map.insert(ID_FIELD.to_string(), JsonValue::String(fixed));
    }
    record
}

/// Correct the identifiers in every slot of a collection delta.
///
/// Both sides of a `changed` entry are corrected. Absent slots stay absent.
pub fn normalize_delta(delta: CollectionDelta) -> CollectionDelta {
    CollectionDelta {
        added: delta.added.map(normalize_record),
        changed: delta.changed.map(|ChangedRecord { prev, next }| ChangedRecord {
            prev: normalize_record(prev),
            next: normalize_record(next),
        }),
        removed: delta.removed.map(normalize_record),
    }
}

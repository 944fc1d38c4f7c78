use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// State value of an action that is waiting for the service to handle it.
pub const ACTION_STATE_ADDED: &str = "added";

/// A unit of work published on the control channel.
///
/// Only `id` and `state` are interpreted locally; every other field the
/// server sends is preserved in `fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Action identifier, echoed back in the acknowledgement call
    pub id: String,

    /// Lifecycle state reported by the server (e.g. "added")
    #[serde(default)]
    pub state: Option<String>,

    /// Remaining document fields
    #[serde(flatten)]
    pub fields: Map<String, JsonValue>,
}

impl ActionRecord {
    /// Parse a control-channel document. Returns `None` when the document
    /// has no string `id`.
    pub fn from_document(document: &JsonValue) -> Option<Self> {
        serde_json::from_value(document.clone()).ok()
    }

    /// Whether the action is newly queued and needs a reply.
    pub fn is_pending(&self) -> bool {
        self.state.as_deref() == Some(ACTION_STATE_ADDED)
    }
}

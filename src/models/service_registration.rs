use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Server answer to a service descriptor registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRegistration {
    /// Whether the server recognized the described service
    #[serde(default)]
    pub service_found: bool,

    /// Service information returned alongside the flag
    #[serde(flatten)]
    pub info: Map<String, JsonValue>,
}

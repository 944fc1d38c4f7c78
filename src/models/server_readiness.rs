use serde::{Deserialize, Serialize};

/// Readiness query response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerReadiness {
    /// Whether the server accepts sessions yet
    #[serde(default)]
    pub is_server_ready: bool,
}

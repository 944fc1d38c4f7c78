use serde::{Deserialize, Serialize};

/// Response of the `externalServicePing` remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingResponse {
    /// Whether the server still considers this service connected
    #[serde(default)]
    pub connection_established: bool,
}

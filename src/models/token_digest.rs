use serde::{Deserialize, Serialize};

/// Hashed credential sent with the login call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDigest {
    /// Base64-encoded digest of the raw token bytes
    pub digest: String,

    /// Hash algorithm name (always "sha-256")
    pub algorithm: String,
}

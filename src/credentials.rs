//! Login credential handling.
//!
//! The raw service token never leaves the process: the login call carries a
//! SHA-256 digest of the token bytes, base64-encoded, together with the
//! algorithm name.

use crate::models::TokenDigest;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use sha2::{Digest, Sha256};
use std::fmt;

/// Algorithm name sent alongside the digest.
pub const DIGEST_ALGORITHM: &str = "sha-256";

/// A service token.
///
/// `Debug` output is redacted so the token cannot end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceToken(String);

impl ServiceToken {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Whether the token is empty (or only whitespace).
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// SHA-256 digest of the raw token bytes, base64-encoded.
    pub fn digest(&self) -> TokenDigest {
        let hash = Sha256::digest(self.0.as_bytes());
        TokenDigest {
            digest: general_purpose::STANDARD.encode(hash),
            algorithm: DIGEST_ALGORITHM.to_string(),
        }
    }

    /// Parameter object for the `login` method.
    pub fn login_params(&self) -> JsonValue {
        json!({ "userToken": self.digest() })
    }
}

impl fmt::Debug for ServiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServiceToken(***)")
    }
}

impl From<String> for ServiceToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}

impl From<&str> for ServiceToken {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

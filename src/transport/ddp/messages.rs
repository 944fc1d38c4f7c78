//! DDP wire messages.
//!
//! Every DDP frame is a JSON object tagged by its `msg` field. Frames without
//! a `msg` field (such as the `{"server_id": "0"}` greeting) carry nothing the
//! client needs and are skipped by [`parse_server_message`].

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Protocol version requested in the handshake.
pub const DDP_VERSION: &str = "1";

/// Versions offered to the server, most preferred first.
pub const DDP_SUPPORTED_VERSIONS: [&str; 3] = ["1", "pre2", "pre1"];

/// Field set of a document, as sent in `added`/`changed` frames.
pub type Fields = Map<String, JsonValue>;

/// Message sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Open a DDP session.
    Connect {
        version: String,
        support: Vec<String>,
    },

    /// Answer to a server `ping`.
    Pong {
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Remote method invocation.
    Method {
        method: String,
        params: Vec<JsonValue>,
        id: String,
    },

    /// Start a subscription.
    Sub {
        id: String,
        name: String,
        params: Vec<JsonValue>,
    },

    /// Stop a subscription.
    Unsub { id: String },
}

impl ClientMessage {
    /// Handshake frame offering every supported version.
    pub fn connect() -> Self {
        ClientMessage::Connect {
            version: DDP_VERSION.to_string(),
            support: DDP_SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Error object carried by `result` and `nosub` frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DdpError {
    /// Error code, a string or a number depending on the server
    #[serde(default)]
    pub error: JsonValue,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl fmt::Display for DdpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(message) = &self.message {
            return f.write_str(message);
        }
        match (&self.error, &self.reason) {
            (JsonValue::Null, Some(reason)) => f.write_str(reason),
            (JsonValue::String(code), Some(reason)) => write!(f, "{} [{}]", reason, code),
            (code, Some(reason)) => write!(f, "{} [{}]", reason, code),
            (JsonValue::String(code), None) => f.write_str(code),
            (JsonValue::Null, None) => f.write_str("unknown error"),
            (code, None) => write!(f, "{}", code),
        }
    }
}

/// Message received from the server.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "msg", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Handshake accepted.
    Connected { session: String },

    /// Handshake refused; `version` is the one the server would accept.
    Failed {
        #[serde(default)]
        version: Option<String>,
    },

    Ping {
        #[serde(default)]
        id: Option<String>,
    },

    Pong {
        #[serde(default)]
        id: Option<String>,
    },

    /// Outcome of a method call.
    #[serde(rename = "result")]
    MethodResult {
        id: String,
        #[serde(default)]
        result: Option<JsonValue>,
        #[serde(default)]
        error: Option<DdpError>,
    },

    /// Writes of the listed methods reached the client.
    Updated {
        #[serde(default)]
        methods: Vec<String>,
    },

    /// The listed subscriptions delivered their initial data.
    Ready {
        #[serde(default)]
        subs: Vec<String>,
    },

    /// A subscription ended, or was refused when `error` is set.
    Nosub {
        id: String,
        #[serde(default)]
        error: Option<DdpError>,
    },

    Added {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Option<Fields>,
    },

    Changed {
        collection: String,
        id: String,
        #[serde(default)]
        fields: Option<Fields>,
        #[serde(default)]
        cleared: Option<Vec<String>>,
    },

    Removed { collection: String, id: String },

    /// Protocol-level error from the server.
    Error {
        #[serde(default)]
        reason: Option<String>,
        #[serde(default, rename = "offendingMessage")]
        offending_message: Option<JsonValue>,
    },

    /// Any other `msg` value (`addedBefore`, `movedBefore`, ...).
    #[serde(other)]
    Unknown,
}

/// Parse one text frame. `Ok(None)` means the frame has no `msg` field.
pub fn parse_server_message(text: &str) -> Result<Option<ServerMessage>> {
    let value: JsonValue = serde_json::from_str(text)?;
    if value.get("msg").is_none() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_value(value)?))
}

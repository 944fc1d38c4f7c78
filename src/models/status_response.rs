use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Value of `StatusResponse::value` when the server is healthy.
pub const STATUS_UP: &str = "up";

/// Body of the server's HTTP `/status` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Health value ("up" when healthy)
    #[serde(default)]
    pub value: Option<String>,

    /// When the server process last started
    #[serde(default)]
    pub up_since: Option<UpSince>,
}

impl StatusResponse {
    /// Whether the server reports itself healthy.
    pub fn is_up(&self) -> bool {
        self.value.as_deref() == Some(STATUS_UP)
    }

    /// Server start time, if present and parseable.
    pub fn up_since(&self) -> Option<DateTime<Utc>> {
        self.up_since.as_ref().and_then(UpSince::to_datetime)
    }
}

/// Server start timestamp as sent on the wire: epoch millis or an RFC 3339 string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpSince {
    Millis(i64),
    Text(String),
}

impl UpSince {
    /// Convert to a UTC timestamp. Unparseable strings yield `None`.
    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            UpSince::Millis(ms) => DateTime::from_timestamp_millis(*ms),
            UpSince::Text(text) => DateTime::parse_from_rfc3339(text.trim())
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

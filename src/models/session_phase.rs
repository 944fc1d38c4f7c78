use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle phase of a [`Session`](crate::Session).
///
/// ```text
/// Idle -> Connecting -> Authenticating -> Orchestrating -> Online
///   ^                                                        |
///   +--------------------- Disconnected <--------------------+
/// ```
///
/// `Disconnected` is re-entered from any phase when the transport drops, and
/// left again when the transport reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Created, never connected
    #[default]
    Idle,
    /// Transport connected; waiting for readiness
    Connecting,
    /// Login in progress
    Authenticating,
    /// Registering the service and subscribing
    Orchestrating,
    /// All subscriptions ready; liveness monitor running
    Online,
    /// Transport dropped or was forced down; waiting for reconnect
    Disconnected,
}

impl SessionPhase {
    /// Whether a transport "connected" signal may start a new startup run.
    pub fn accepts_connect(&self) -> bool {
        matches!(self, SessionPhase::Idle | SessionPhase::Disconnected)
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Authenticating => "authenticating",
            SessionPhase::Orchestrating => "orchestrating",
            SessionPhase::Online => "online",
            SessionPhase::Disconnected => "disconnected",
        };
        write!(f, "{}", name)
    }
}

//! Timing configuration for sessions and the DDP transport.
//!
//! Centralizes every interval and deadline the session layer uses: liveness
//! probing, readiness polling, transport reconnects and per-call deadlines.

use std::time::Duration;

/// Timing configuration for a session.
///
/// # Examples
///
/// ```rust
/// use catalogue_link::LinkTimeouts;
/// use std::time::Duration;
///
/// // Defaults match the production server expectations
/// let timeouts = LinkTimeouts::default();
/// assert_eq!(timeouts.probe_interval, Duration::from_secs(60));
///
/// // Tighter probing for a flaky network
/// let timeouts = LinkTimeouts::builder()
///     .probe_interval_secs(15)
///     .probe_timeout_secs(10)
///     .build();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LinkTimeouts {
    /// Period between liveness probes while the session is online.
    /// Default: 60 seconds
    pub probe_interval: Duration,

    /// Hard deadline for a single liveness probe. A probe that has not
    /// resolved by then counts as failed.
    /// Default: 60 seconds
    pub probe_timeout: Duration,

    /// Sleep between two readiness polls while the server reports not ready.
    /// Default: 10 seconds
    pub readiness_backoff: Duration,

    /// Delay before the transport re-dials after an unexpected drop.
    /// Default: 5 seconds
    pub reconnect_interval: Duration,

    /// Timeout for the WebSocket handshake plus the DDP `connect` exchange.
    /// Default: 10 seconds
    pub connection_timeout: Duration,

    /// Deadline for a remote method result. Set to 0 to wait indefinitely.
    /// Default: 30 seconds
    pub call_timeout: Duration,

    /// Deadline for a subscription `ready`. Set to 0 to wait indefinitely.
    /// Default: 30 seconds
    pub subscribe_timeout: Duration,
}

impl Default for LinkTimeouts {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(60),
            readiness_backoff: Duration::from_secs(10),
            reconnect_interval: Duration::from_secs(5),
            connection_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(30),
            subscribe_timeout: Duration::from_secs(30),
        }
    }
}

impl LinkTimeouts {
    /// Create a new builder for custom timing configuration.
    pub fn builder() -> LinkTimeoutsBuilder {
        LinkTimeoutsBuilder::new()
    }

    /// Short intervals for a server on localhost.
    pub fn fast() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            readiness_backoff: Duration::from_secs(1),
            reconnect_interval: Duration::from_millis(500),
            connection_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(5),
            subscribe_timeout: Duration::from_secs(5),
        }
    }

    /// Check if a duration represents "no timeout" (zero or very large).
    pub fn is_no_timeout(duration: Duration) -> bool {
        duration.is_zero() || duration > Duration::from_secs(86400 * 365)
    }
}

/// Builder for [`LinkTimeouts`].
#[derive(Debug, Clone)]
pub struct LinkTimeoutsBuilder {
    timeouts: LinkTimeouts,
}

impl LinkTimeoutsBuilder {
    fn new() -> Self {
        Self {
            timeouts: LinkTimeouts::default(),
        }
    }

    /// Set the liveness probe period.
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.timeouts.probe_interval = interval;
        self
    }

    /// Set the liveness probe period in seconds.
    pub fn probe_interval_secs(self, secs: u64) -> Self {
        self.probe_interval(Duration::from_secs(secs))
    }

    /// Set the per-probe deadline.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.probe_timeout = timeout;
        self
    }

    /// Set the per-probe deadline in seconds.
    pub fn probe_timeout_secs(self, secs: u64) -> Self {
        self.probe_timeout(Duration::from_secs(secs))
    }

    /// Set the sleep between readiness polls.
    pub fn readiness_backoff(mut self, backoff: Duration) -> Self {
        self.timeouts.readiness_backoff = backoff;
        self
    }

    /// Set the sleep between readiness polls in seconds.
    pub fn readiness_backoff_secs(self, secs: u64) -> Self {
        self.readiness_backoff(Duration::from_secs(secs))
    }

    /// Set the transport re-dial delay.
    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.timeouts.reconnect_interval = interval;
        self
    }

    /// Set the connection handshake timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.connection_timeout = timeout;
        self
    }

    /// Set the remote method deadline. 0 disables it.
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.call_timeout = timeout;
        self
    }

    /// Set the subscription ready deadline. 0 disables it.
    pub fn subscribe_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts.subscribe_timeout = timeout;
        self
    }

    /// Build the timing configuration.
    pub fn build(self) -> LinkTimeouts {
        self.timeouts
    }
}

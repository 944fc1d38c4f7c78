//! # catalogue-link
//!
//! Client session library that keeps an external service attached to a
//! catalogue server over a DDP WebSocket connection.
//!
//! On every (re)connection a [`Session`] optionally waits for the server to
//! be ready, logs in with a SHA-256 digest of the service token, registers the
//! service descriptor, subscribes to the control channel and to every data
//! collection the server lists, then probes the server periodically and forces
//! a reconnect when a probe fails. Changes arrive as typed events:
//!
//! - `connection-opened` / `connection-closed`
//! - `service-subscribed` with the server's registration answer
//! - `action-added` for queued actions, with a one-shot [`ActionAck`]
//! - `data-changed` for data collection changes, with identifiers normalized
//! - `queue-changed` for every control-channel change
//! - `error` for recoverable problems (never thrown at the caller)
//!
//! # Example
//!
//! ```rust,no_run
//! use catalogue_link::{Session, SessionConfig};
//! use serde_json::json;
//!
//! # async fn example() -> catalogue_link::Result<()> {
//! let config = SessionConfig::new("wss://catalogue.example.org", "service-token")
//!     .with_service_description(json!({"name": "thermostat-bridge"}))
//!     .with_data_fields(json!({"name": 1, "value": 1}));
//!
//! let session = Session::new(config)?;
//! session
//!     .on_data_changed(|collection, delta| println!("{} changed: {:?}", collection, delta))
//!     .on_action_added(|action, ack| {
//!         println!("Handling action {}", action.id);
//!         ack.reply_detached(Some(json!({"done": true})), None);
//!     })
//!     .on_error(|err| eprintln!("{}", err));
//!
//! session.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Without an explicit configuration, [`Session::from_env`] reads the
//! `config` environment variable (JSON) or, when `development` is set, uses a
//! local server at `ws://127.0.0.1:3000`.

pub mod action_ack;
pub mod config;
pub mod credentials;
pub mod error;
pub mod event_handlers;
pub mod liveness;
pub mod models;
pub mod normalize;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod timeouts;
pub mod transport;

pub use action_ack::ActionAck;
pub use config::{ConnectionProps, LivenessMode, SessionConfig};
pub use credentials::ServiceToken;
pub use error::{LinkError, Result};
pub use event_handlers::{ConnectionError, EventHandlers, EventKind};
pub use liveness::{
    HttpStatusProbe, LivenessFailure, LivenessMonitor, LivenessProbe, ProbeReport, RpcPingProbe,
};
pub use models::{
    ActionRecord, ChangedRecord, CollectionDelta, DeltaKind, ServiceRegistration, SessionPhase,
};
pub use normalize::{normalize_delta, normalize_record};
pub use orchestrator::SubscriptionOrchestrator;
pub use session::{Session, SessionBuilder};
pub use timeouts::{LinkTimeouts, LinkTimeoutsBuilder};
pub use transport::{
    CollectionObserver, DdpTransport, DeltaCallback, SubscriptionHandle, Transport,
    TransportSignal,
};

//! Transport abstraction.
//!
//! The session layer drives any reconnecting publish/subscribe client that
//! implements [`Transport`]. This module contains:
//! - the [`Transport`] trait and its handle traits
//! - [`ddp`]: a DDP-over-WebSocket implementation

pub mod ddp;

use crate::{error::Result, models::CollectionDelta};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

pub use ddp::DdpTransport;

/// Connection-level notification emitted by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportSignal {
    /// The connection is open and the protocol handshake completed.
    Connected,
    /// The connection closed, for any reason.
    Disconnected,
    /// A transport-level problem that does not by itself close the connection.
    Error(String),
}

impl fmt::Display for TransportSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSignal::Connected => write!(f, "connected"),
            TransportSignal::Disconnected => write!(f, "disconnected"),
            TransportSignal::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Callback invoked for every change of an observed collection.
pub type DeltaCallback = Arc<dyn Fn(CollectionDelta) + Send + Sync>;

/// An active server-side subscription.
#[async_trait]
pub trait SubscriptionHandle: Send + Sync {
    /// Subscription name as passed to [`Transport::subscribe`].
    fn name(&self) -> &str;

    /// Resolve once the server marks the subscription ready; fail if the
    /// server refuses it or the connection drops first.
    async fn ready(&self) -> Result<()>;

    /// Cancel the subscription. Calling it more than once is harmless.
    async fn remove(&self);
}

/// A registered listener on one collection.
pub trait CollectionObserver: Send + Sync {
    /// Collection being observed.
    fn collection(&self) -> &str;

    /// Stop delivering changes. Calling it more than once is harmless.
    fn stop(&self);
}

/// A reconnecting, message-oriented publish/subscribe client.
///
/// Implementations own their reconnect policy: after an unexpected drop they
/// re-dial on their own and emit [`TransportSignal::Connected`] again. After
/// an explicit [`disconnect`](Transport::disconnect) they stay down until
/// [`connect`](Transport::connect) is called.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Register a new signal listener. Every listener receives every signal
    /// emitted after registration, in emission order.
    fn signals(&self) -> mpsc::UnboundedReceiver<TransportSignal>;

    /// Start (or resume) connecting. Returns once the request is accepted;
    /// the outcome is reported through [`signals`](Transport::signals).
    async fn connect(&self) -> Result<()>;

    /// Close the connection and suspend automatic reconnects. Emits
    /// [`TransportSignal::Disconnected`] if the connection was open.
    async fn disconnect(&self) -> Result<()>;

    /// Invoke a remote method and wait for its result.
    async fn call(&self, method: &str, params: Vec<JsonValue>) -> Result<JsonValue>;

    /// Start a named subscription.
    async fn subscribe(&self, name: &str, params: Vec<JsonValue>)
        -> Result<Box<dyn SubscriptionHandle>>;

    /// Observe changes on a collection.
    fn observe(&self, collection: &str, on_change: DeltaCallback) -> Box<dyn CollectionObserver>;
}

//! Session event surface.
//!
//! A small typed event bus with one handler list per event:
//!
//! | Event | Handler registration | Payload |
//! |---|---|---|
//! | `connection-opened` | [`on_connection_opened`](EventHandlers::on_connection_opened) | none |
//! | `connection-closed` | [`on_connection_closed`](EventHandlers::on_connection_closed) | none |
//! | `service-subscribed` | [`on_service_subscribed`](EventHandlers::on_service_subscribed) | [`ServiceRegistration`] |
//! | `action-added` | [`on_action_added`](EventHandlers::on_action_added) | [`ActionRecord`], [`ActionAck`] |
//! | `data-changed` | [`on_data_changed`](EventHandlers::on_data_changed) | collection name, [`CollectionDelta`] |
//! | `queue-changed` | [`on_queue_changed`](EventHandlers::on_queue_changed) | [`CollectionDelta`], populated [`DeltaKind`]s |
//! | `error` | [`on_error`](EventHandlers::on_error) | [`ConnectionError`] |
//!
//! Handlers run synchronously, in registration order, on whichever task
//! produced the event: connection events come from the session task, change
//! events from the transport's delivery task. They must not block; long work
//! belongs in a spawned task.
//!
//! # Example
//!
//! ```rust
//! use catalogue_link::EventHandlers;
//!
//! let handlers = EventHandlers::new();
//! handlers
//!     .on_connection_opened(|| println!("Connected"))
//!     .on_data_changed(|collection, delta| println!("{}: {:?}", collection, delta))
//!     .on_error(|err| eprintln!("Error (recoverable={}): {}", err.recoverable, err));
//! ```

use crate::{
    action_ack::ActionAck,
    models::{ActionRecord, CollectionDelta, DeltaKind, ServiceRegistration},
};
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Fixed names of the session events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionOpened,
    ConnectionClosed,
    ServiceSubscribed,
    ActionAdded,
    DataChanged,
    QueueChanged,
    Error,
}

impl EventKind {
    /// Wire-style event name.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::ConnectionOpened => "connection-opened",
            EventKind::ConnectionClosed => "connection-closed",
            EventKind::ServiceSubscribed => "service-subscribed",
            EventKind::ActionAdded => "action-added",
            EventKind::DataChanged => "data-changed",
            EventKind::QueueChanged => "queue-changed",
            EventKind::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error information passed to `error` handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionError {
    /// Human-readable error message.
    pub message: String,
    /// Whether the session recovers on its own (by reconnecting).
    pub recoverable: bool,
}

impl ConnectionError {
    /// Create a new connection error.
    pub fn new(message: impl Into<String>, recoverable: bool) -> Self {
        Self {
            message: message.into(),
            recoverable,
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Handler for `connection-opened`.
pub type OnConnectionOpened = Arc<dyn Fn() + Send + Sync>;

/// Handler for `connection-closed`.
pub type OnConnectionClosed = Arc<dyn Fn() + Send + Sync>;

/// Handler for `service-subscribed`.
pub type OnServiceSubscribed = Arc<dyn Fn(&ServiceRegistration) + Send + Sync>;

/// Handler for `action-added`.
pub type OnActionAdded = Arc<dyn Fn(&ActionRecord, ActionAck) + Send + Sync>;

/// Handler for `data-changed`.
pub type OnDataChanged = Arc<dyn Fn(&str, &CollectionDelta) + Send + Sync>;

/// Handler for `queue-changed`.
pub type OnQueueChanged = Arc<dyn Fn(&CollectionDelta, &[DeltaKind]) + Send + Sync>;

/// Handler for `error`.
pub type OnErrorCallback = Arc<dyn Fn(&ConnectionError) + Send + Sync>;

#[derive(Default)]
struct HandlerLists {
    connection_opened: Vec<OnConnectionOpened>,
    connection_closed: Vec<OnConnectionClosed>,
    service_subscribed: Vec<OnServiceSubscribed>,
    action_added: Vec<OnActionAdded>,
    data_changed: Vec<OnDataChanged>,
    queue_changed: Vec<OnQueueChanged>,
    error: Vec<OnErrorCallback>,
}

/// Registry of session event handlers.
///
/// Shared between the session and its consumers; registration is allowed at
/// any time and takes effect for the next emitted event.
#[derive(Default)]
pub struct EventHandlers {
    lists: RwLock<HandlerLists>,
}

impl fmt::Debug for EventHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lists = self.read();
        f.debug_struct("EventHandlers")
            .field("connection_opened", &lists.connection_opened.len())
            .field("connection_closed", &lists.connection_closed.len())
            .field("service_subscribed", &lists.service_subscribed.len())
            .field("action_added", &lists.action_added.len())
            .field("data_changed", &lists.data_changed.len())
            .field("queue_changed", &lists.queue_changed.len())
            .field("error", &lists.error.len())
            .finish()
    }
}

impl EventHandlers {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HandlerLists> {
        self.lists.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HandlerLists> {
        self.lists.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a handler for `connection-opened`.
    pub fn on_connection_opened(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.write().connection_opened.push(Arc::new(f));
        self
    }

    /// Register a handler for `connection-closed`.
    pub fn on_connection_closed(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.write().connection_closed.push(Arc::new(f));
        self
    }

    /// Register a handler for `service-subscribed`.
    pub fn on_service_subscribed(
        &self,
        f: impl Fn(&ServiceRegistration) + Send + Sync + 'static,
    ) -> &Self {
        self.write().service_subscribed.push(Arc::new(f));
        self
    }

    /// Register a handler for `action-added`.
    ///
    /// Every handler receives a clone of the same [`ActionAck`]; only the
    /// first reply across all of them reaches the server.
    pub fn on_action_added(
        &self,
        f: impl Fn(&ActionRecord, ActionAck) + Send + Sync + 'static,
    ) -> &Self {
        self.write().action_added.push(Arc::new(f));
        self
    }

    /// Register a handler for `data-changed`.
    pub fn on_data_changed(
        &self,
        f: impl Fn(&str, &CollectionDelta) + Send + Sync + 'static,
    ) -> &Self {
        self.write().data_changed.push(Arc::new(f));
        self
    }

    /// Register a handler for `queue-changed`.
    pub fn on_queue_changed(
        &self,
        f: impl Fn(&CollectionDelta, &[DeltaKind]) + Send + Sync + 'static,
    ) -> &Self {
        self.write().queue_changed.push(Arc::new(f));
        self
    }

    /// Register a handler for `error`.
    pub fn on_error(&self, f: impl Fn(&ConnectionError) + Send + Sync + 'static) -> &Self {
        self.write().error.push(Arc::new(f));
        self
    }

    /// Number of handlers registered for an event.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        let lists = self.read();
        match kind {
            EventKind::ConnectionOpened => lists.connection_opened.len(),
            EventKind::ConnectionClosed => lists.connection_closed.len(),
            EventKind::ServiceSubscribed => lists.service_subscribed.len(),
            EventKind::ActionAdded => lists.action_added.len(),
            EventKind::DataChanged => lists.data_changed.len(),
            EventKind::QueueChanged => lists.queue_changed.len(),
            EventKind::Error => lists.error.len(),
        }
    }

    // ---------------------------------------------------------------
    // Internal dispatch helpers
    //
    // Handler lists are cloned out of the lock before dispatch so a handler
    // may register further handlers.
    // ---------------------------------------------------------------

    pub(crate) fn emit_connection_opened(&self) {
        let handlers = self.read().connection_opened.clone();
        for cb in handlers {
            cb();
        }
    }

    pub(crate) fn emit_connection_closed(&self) {
        let handlers = self.read().connection_closed.clone();
        for cb in handlers {
            cb();
        }
    }

    pub(crate) fn emit_service_subscribed(&self, registration: &ServiceRegistration) {
        let handlers = self.read().service_subscribed.clone();
        for cb in handlers {
            cb(registration);
        }
    }

    pub(crate) fn emit_action_added(&self, action: &ActionRecord, ack: &ActionAck) {
        let handlers = self.read().action_added.clone();
        for cb in handlers {
            cb(action, ack.clone());
        }
    }

    pub(crate) fn emit_data_changed(&self, collection: &str, delta: &CollectionDelta) {
        let handlers = self.read().data_changed.clone();
        for cb in handlers {
            cb(collection, delta);
        }
    }

    pub(crate) fn emit_queue_changed(&self, delta: &CollectionDelta, kinds: &[DeltaKind]) {
        let handlers = self.read().queue_changed.clone();
        for cb in handlers {
            cb(delta, kinds);
        }
    }

    pub(crate) fn emit_error(&self, error: ConnectionError) {
        let handlers = self.read().error.clone();
        for cb in handlers {
            cb(&error);
        }
    }
}

#![allow(dead_code)]
//! Shared helpers for the session integration tests.
//!
//! [`MockTransport`] stands in for the DDP client: remote calls answer from
//! per-method scripts, subscriptions become ready on demand, and tests push
//! collection changes and connection signals by hand.

use async_trait::async_trait;
use catalogue_link::{
    transport::{CollectionObserver, DeltaCallback, SubscriptionHandle, Transport, TransportSignal},
    CollectionDelta, LinkError, LinkTimeouts, LivenessMode, Result, SessionConfig,
};
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const SOCKET_ADDRESS: &str = "ws://127.0.0.1:3000";
pub const SERVICE_TOKEN: &str = "service-token";

/// Configuration for tests driving a [`MockTransport`]: no liveness probe
/// unless a test installs one.
pub fn test_config() -> SessionConfig {
    SessionConfig::new(SOCKET_ADDRESS, SERVICE_TOKEN)
        .with_service_description(json!({"name": "test-service"}))
        .with_data_fields(json!({"name": 1, "value": 1}))
        .with_liveness(LivenessMode::Disabled)
        .with_timeouts(LinkTimeouts::default())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Poll `condition` every 10ms until it holds. Panics after `limit`.
pub async fn wait_until(limit: Duration, what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + limit;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("Timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Run `fut` with a generous deadline so a broken test fails instead of hanging.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(600), fut)
        .await
        .expect("test step timed out")
}

/// Ordered log of emitted session events.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        lock(&self.entries).push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        lock(&self.entries).clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        lock(&self.entries).iter().filter(|e| e.starts_with(prefix)).count()
    }
}

/// One remote call recorded by the mock.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: String,
    pub params: Vec<JsonValue>,
    pub at: tokio::time::Instant,
}

/// A subscription created through the mock.
pub struct MockSubscription {
    pub name: String,
    pub params: Vec<JsonValue>,
    state_tx: watch::Sender<Option<Result<()>>>,
    removed: AtomicUsize,
}

impl MockSubscription {
    /// Let `ready()` resolve successfully.
    pub fn mark_ready(&self) {
        self.state_tx.send_replace(Some(Ok(())));
    }

    /// Let `ready()` fail, as on a `nosub`.
    pub fn refuse(&self, message: &str) {
        self.state_tx.send_replace(Some(Err(LinkError::SubscriptionError {
            name: self.name.clone(),
            message: message.to_string(),
        })));
    }

    pub fn removed_count(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    /// First parameter, which names the collection for data subscriptions.
    pub fn collection(&self) -> Option<&str> {
        self.params.first().and_then(JsonValue::as_str)
    }
}

struct SubHandle(Arc<MockSubscription>);

#[async_trait]
impl SubscriptionHandle for SubHandle {
    fn name(&self) -> &str {
        &self.0.name
    }

    async fn ready(&self) -> Result<()> {
        let mut rx = self.0.state_tx.subscribe();
        let state = rx
            .wait_for(Option::is_some)
            .await
            .map_err(|_| LinkError::NotConnected)?
            .clone();
        state.unwrap_or(Err(LinkError::NotConnected))
    }

    async fn remove(&self) {
        self.0.removed.fetch_add(1, Ordering::SeqCst);
    }
}

struct ObserverEntry {
    id: u64,
    collection: String,
    callback: DeltaCallback,
    stops: Arc<AtomicUsize>,
}

struct ObserverHandle {
    collection: String,
    stops: Arc<AtomicUsize>,
}

impl CollectionObserver for ObserverHandle {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Scriptable in-memory [`Transport`].
#[derive(Default)]
pub struct MockTransport {
    listeners: Mutex<Vec<mpsc::UnboundedSender<TransportSignal>>>,
    scripted: Mutex<HashMap<String, VecDeque<Result<JsonValue>>>>,
    defaults: Mutex<HashMap<String, JsonValue>>,
    hanging: Mutex<HashSet<String>>,
    held_subscriptions: Mutex<HashSet<String>>,
    calls: Mutex<Vec<RecordedCall>>,
    subscriptions: Mutex<Vec<Arc<MockSubscription>>>,
    observers: Mutex<Vec<ObserverEntry>>,
    next_observer_id: AtomicU64,
    connected: AtomicBool,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Answer `method` with `value` whenever no scripted answer is queued.
    pub fn answer(&self, method: &str, value: JsonValue) -> &Self {
        lock(&self.defaults).insert(method.to_string(), value);
        self
    }

    /// Queue a one-off answer for the next call to `method`.
    pub fn script(&self, method: &str, outcome: Result<JsonValue>) -> &Self {
        lock(&self.scripted)
            .entry(method.to_string())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Calls to `method` never complete.
    pub fn hang(&self, method: &str) -> &Self {
        lock(&self.hanging).insert(method.to_string());
        self
    }

    /// Subscriptions named `name` stay pending until marked ready.
    pub fn hold_ready(&self, name: &str) -> &Self {
        lock(&self.held_subscriptions).insert(name.to_string());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn calls_to(&self, method: &str) -> Vec<RecordedCall> {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method == method)
            .cloned()
            .collect()
    }

    pub fn subscriptions(&self) -> Vec<Arc<MockSubscription>> {
        lock(&self.subscriptions).clone()
    }

    pub fn subscription_for(&self, collection: &str) -> Option<Arc<MockSubscription>> {
        lock(&self.subscriptions)
            .iter()
            .find(|s| s.collection() == Some(collection))
            .cloned()
    }

    /// Observers registered so far, as `(collection, stop count)`.
    pub fn observers(&self) -> Vec<(String, usize)> {
        lock(&self.observers)
            .iter()
            .map(|o| (o.collection.clone(), o.stops.load(Ordering::SeqCst)))
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Deliver a change to every live observer of `collection`.
    pub fn push_delta(&self, collection: &str, delta: CollectionDelta) {
        let callbacks: Vec<DeltaCallback> = lock(&self.observers)
            .iter()
            .filter(|o| o.collection == collection && o.stops.load(Ordering::SeqCst) == 0)
            .map(|o| o.callback.clone())
            .collect();
        for callback in callbacks {
            callback(delta.clone());
        }
    }

    /// Simulate an unexpected drop of the connection.
    pub fn drop_connection(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.emit(TransportSignal::Disconnected);
        }
    }

    /// Simulate the transport coming back on its own.
    pub fn restore_connection(&self) {
        if !self.connected.swap(true, Ordering::SeqCst) {
            self.emit(TransportSignal::Connected);
        }
    }

    pub fn emit(&self, signal: TransportSignal) {
        lock(&self.listeners).retain(|tx| tx.send(signal.clone()).is_ok());
    }

    fn next_answer(&self, method: &str) -> Result<JsonValue> {
        if let Some(outcome) = lock(&self.scripted)
            .get_mut(method)
            .and_then(VecDeque::pop_front)
        {
            return outcome;
        }
        Ok(lock(&self.defaults)
            .get(method)
            .cloned()
            .unwrap_or(JsonValue::Null))
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn signals(&self) -> mpsc::UnboundedReceiver<TransportSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.listeners).push(tx);
        rx
    }

    async fn connect(&self) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        self.restore_connection();
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.drop_connection();
        Ok(())
    }

    async fn call(&self, method: &str, params: Vec<JsonValue>) -> Result<JsonValue> {
        lock(&self.calls).push(RecordedCall {
            method: method.to_string(),
            params,
            at: tokio::time::Instant::now(),
        });
        if lock(&self.hanging).contains(method) {
            std::future::pending::<()>().await;
        }
        self.next_answer(method)
    }

    async fn subscribe(
        &self,
        name: &str,
        params: Vec<JsonValue>,
    ) -> Result<Box<dyn SubscriptionHandle>> {
        let initial = if lock(&self.held_subscriptions).contains(name) {
            None
        } else {
            Some(Ok(()))
        };
        let (state_tx, _) = watch::channel(initial);
        let sub = Arc::new(MockSubscription {
            name: name.to_string(),
            params,
            state_tx,
            removed: AtomicUsize::new(0),
        });
        lock(&self.subscriptions).push(sub.clone());
        Ok(Box::new(SubHandle(sub)))
    }

    fn observe(&self, collection: &str, on_change: DeltaCallback) -> Box<dyn CollectionObserver> {
        let stops = Arc::new(AtomicUsize::new(0));
        lock(&self.observers).push(ObserverEntry {
            id: self.next_observer_id.fetch_add(1, Ordering::SeqCst),
            collection: collection.to_string(),
            callback: on_change,
            stops: stops.clone(),
        });
        Box::new(ObserverHandle {
            collection: collection.to_string(),
            stops,
        })
    }
}

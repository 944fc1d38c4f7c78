//! Per-connection startup and teardown.
//!
//! Once the transport reports "connected", the [`SubscriptionOrchestrator`]
//! runs the startup sequence strictly in order:
//!
//! 0. record the liveness baseline epoch
//! 1. poll the readiness query until the server is ready (optional)
//! 2. log in with the token digest
//! 3. register the service descriptor
//! 4. observe the control collection and subscribe to the control channel
//! 5. discover the data collections, then observe and subscribe to each one,
//!    waiting for every subscription's ready before the next
//!
//! Any failure aborts the remaining steps. Every handle created along the way
//! is recorded the moment it exists, so [`teardown`](SubscriptionOrchestrator::teardown)
//! releases exactly what was created, even when startup was interrupted.

use crate::{
    action_ack::ActionAck,
    config::SessionConfig,
    error::{LinkError, Result},
    event_handlers::EventHandlers,
    liveness::{Epoch, LivenessProbe},
    models::{
        ActionRecord, CollectionDelta, ServerReadiness, ServiceRegistration, SessionPhase,
    },
    normalize::normalize_delta,
    protocol::{
        COLLECTION_CONTROL, METHOD_DATA_COLLECTION_NAMES, METHOD_IS_SERVER_READY, METHOD_LOGIN,
        METHOD_REGISTER_SERVICE, SUBSCRIPTION_CONTROL, SUBSCRIPTION_SERVICE_DATA,
    },
    timeouts::LinkTimeouts,
    transport::{CollectionObserver, SubscriptionHandle, Transport},
};
use serde_json::{json, Map, Value as JsonValue};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

/// Runs startup for one connection and owns the handles it creates.
pub struct SubscriptionOrchestrator {
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    handlers: Arc<EventHandlers>,
    control_sub: Option<Box<dyn SubscriptionHandle>>,
    data_subs: Vec<Box<dyn SubscriptionHandle>>,
    observers: Vec<Box<dyn CollectionObserver>>,
}

impl SubscriptionOrchestrator {
    pub fn new(
        transport: Arc<dyn Transport>,
        config: SessionConfig,
        handlers: Arc<EventHandlers>,
    ) -> Self {
        Self {
            transport,
            config,
            handlers,
            control_sub: None,
            data_subs: Vec::new(),
            observers: Vec::new(),
        }
    }

    /// Run the startup sequence, publishing `Authenticating` and
    /// `Orchestrating` on `phase` as it goes. Returns the liveness baseline
    /// epoch.
    ///
    /// Dropping the returned future interrupts startup at its current step;
    /// call [`teardown`](Self::teardown) afterwards.
    pub async fn startup(
        &mut self,
        probe: Option<&dyn LivenessProbe>,
        phase: &watch::Sender<SessionPhase>,
    ) -> Result<Option<Epoch>> {
        let baseline = match probe {
            Some(probe) => probe.baseline().await?,
            None => None,
        };

        if self.config.wait_for_readiness {
            self.wait_for_readiness().await?;
        }

        phase.send_replace(SessionPhase::Authenticating);
        self.authenticate().await?;

        phase.send_replace(SessionPhase::Orchestrating);
        let registration = self.register_service().await?;
        if registration.service_found {
            self.handlers.emit_service_subscribed(&registration);
        } else {
            log::info!("[orchestrator] Service descriptor not matched by the server yet");
        }

        self.subscribe_control().await?;
        self.subscribe_data().await?;

        log::info!(
            "[orchestrator] Startup complete: {} data subscription(s)",
            self.data_subs.len()
        );
        Ok(baseline)
    }

    /// Release every observer and subscription created so far. Never fails;
    /// calling it again is a no-op.
    pub async fn teardown(&mut self) {
        let observers = self.active_observers();
        let subs = self.active_subscriptions();

        for observer in self.observers.drain(..) {
            observer.stop();
        }
        if let Some(sub) = self.control_sub.take() {
            sub.remove().await;
        }
        for sub in self.data_subs.drain(..) {
            sub.remove().await;
        }

        if observers + subs > 0 {
            log::debug!(
                "[orchestrator] Released {} observer(s) and {} subscription(s)",
                observers,
                subs
            );
        }
    }

    /// Live subscriptions (control plus data).
    fn active_subscriptions(&self) -> usize {
        self.data_subs.len() + usize::from(self.control_sub.is_some())
    }

    fn active_observers(&self) -> usize {
        self.observers.len()
    }

    async fn wait_for_readiness(&self) -> Result<()> {
        let backoff = self.config.timeouts.readiness_backoff;
        loop {
            let value = self.transport.call(METHOD_IS_SERVER_READY, Vec::new()).await?;
            if parse_readiness(value)? {
                log::debug!("[orchestrator] Server is ready");
                return Ok(());
            }
            log::info!("[orchestrator] Server not ready, retrying in {:?}", backoff);
            tokio::time::sleep(backoff).await;
        }
    }

    async fn authenticate(&self) -> Result<()> {
        let params = self.config.service_token()?.login_params();
        self.transport
            .call(METHOD_LOGIN, vec![params])
            .await
            .map_err(|e| match e {
                LinkError::RemoteError { message, .. } => LinkError::AuthenticationError(message),
                other => other,
            })?;
        log::info!("[orchestrator] Logged in");
        Ok(())
    }

    async fn register_service(&self) -> Result<ServiceRegistration> {
        let value = self
            .transport
            .call(METHOD_REGISTER_SERVICE, vec![self.config.service_description.clone()])
            .await?;
        parse_registration(value)
    }

    async fn subscribe_control(&mut self) -> Result<()> {
        let handlers = self.handlers.clone();
        let transport = self.transport.clone();
        let observer = self.transport.observe(
            COLLECTION_CONTROL,
            Arc::new(move |delta| dispatch_control(&handlers, &transport, delta)),
        );
        self.observers.push(observer);

        let sub = self.transport.subscribe(SUBSCRIPTION_CONTROL, Vec::new()).await?;
        let sub = self.control_sub.insert(sub);
        wait_ready(&**sub, &self.config.timeouts).await?;
        log::debug!("[orchestrator] Control channel ready");
        Ok(())
    }

    async fn subscribe_data(&mut self) -> Result<()> {
        let value = self
            .transport
            .call(METHOD_DATA_COLLECTION_NAMES, Vec::new())
            .await?;
        let names: Vec<String> = match value {
            JsonValue::Null => Vec::new(),
            other => serde_json::from_value(other)?,
        };
        let fields = self.config.connection_props.field_selection();

        for name in names {
            let gate = Arc::new(DeliveryGate::new(&name, self.handlers.clone()));
            let sink = gate.clone();
            let observer = self
                .transport
                .observe(&name, Arc::new(move |delta| sink.deliver(delta)));
            self.observers.push(observer);

            let sub = self
                .transport
                .subscribe(
                    SUBSCRIPTION_SERVICE_DATA,
                    vec![JsonValue::String(name.clone()), json!({ "fields": fields })],
                )
                .await?;
            self.data_subs.push(sub);
            if let Some(sub) = self.data_subs.last() {
                wait_ready(&**sub, &self.config.timeouts).await?;
            }

            gate.open();
            log::debug!("[orchestrator] Data collection '{}' ready", name);
        }
        Ok(())
    }
}

async fn wait_ready(sub: &dyn SubscriptionHandle, timeouts: &LinkTimeouts) -> Result<()> {
    let limit: Duration = timeouts.subscribe_timeout;
    if LinkTimeouts::is_no_timeout(limit) {
        return sub.ready().await;
    }
    tokio::time::timeout(limit, sub.ready()).await.map_err(|_| {
        LinkError::TimeoutError(format!(
            "Subscription '{}' not ready within {:?}",
            sub.name(),
            limit
        ))
    })?
}

/// Readiness answers come as `{isServerReady}` or as a bare boolean.
fn parse_readiness(value: JsonValue) -> Result<bool> {
    match value {
        JsonValue::Bool(ready) => Ok(ready),
        JsonValue::Null => Ok(false),
        other => Ok(serde_json::from_value::<ServerReadiness>(other)?.is_server_ready),
    }
}

/// Registration answers come as `{serviceFound, ...}`, a bare boolean or nothing.
fn parse_registration(value: JsonValue) -> Result<ServiceRegistration> {
    match value {
        JsonValue::Object(_) => Ok(serde_json::from_value(value)?),
        JsonValue::Bool(service_found) => Ok(ServiceRegistration {
            service_found,
            info: Map::new(),
        }),
        _ => Ok(ServiceRegistration {
            service_found: false,
            info: Map::new(),
        }),
    }
}

/// Control-channel change: always a `queue-changed`, plus an `action-added`
/// for newly queued actions. Control records keep their ids verbatim.
fn dispatch_control(handlers: &EventHandlers, transport: &Arc<dyn Transport>, delta: CollectionDelta) {
    let kinds = delta.kinds();
    handlers.emit_queue_changed(&delta, &kinds);

    let Some(added) = &delta.added else {
        return;
    };
    match ActionRecord::from_document(added) {
        Some(action) if action.is_pending() => {
            log::debug!("[orchestrator] Action '{}' queued", action.id);
            let ack = ActionAck::new(action.id.clone(), transport.clone());
            handlers.emit_action_added(&action, &ack);
        },
        Some(_) => {},
        None => log::warn!("[orchestrator] Control record without a string id: {}", added),
    }
}

/// Holds a data collection's deltas until its subscription is ready, then
/// releases them in arrival order and passes later ones straight through.
///
/// Handlers run without the state lock held. Only one caller drains at a
/// time, so a delta delivered while another is being handled (including
/// from inside a handler) queues behind it.
struct DeliveryGate {
    collection: String,
    handlers: Arc<EventHandlers>,
    state: Mutex<GateState>,
}

#[derive(Default)]
struct GateState {
    open: bool,
    draining: bool,
    pending: VecDeque<CollectionDelta>,
}

impl DeliveryGate {
    fn new(collection: &str, handlers: Arc<EventHandlers>) -> Self {
        Self {
            collection: collection.to_string(),
            handlers,
            state: Mutex::new(GateState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(&self, delta: CollectionDelta) {
        let delta = normalize_delta(delta);
        {
            let mut state = self.lock();
            state.pending.push_back(delta);
            if !state.open || state.draining {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    fn open(&self) {
        {
            let mut state = self.lock();
            if state.open {
                return;
            }
            state.open = true;
            if !state.pending.is_empty() {
                log::debug!(
                    "[orchestrator] Releasing {} held change(s) for '{}'",
                    state.pending.len(),
                    self.collection
                );
            }
            if state.draining {
                return;
            }
            state.draining = true;
        }
        self.drain();
    }

    /// Emit pending deltas until none are left. The caller has set `draining`.
    fn drain(&self) {
        loop {
            let next = {
                let mut state = self.lock();
                let next = state.pending.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };
            match next {
                Some(delta) => self.handlers.emit_data_changed(&self.collection, &delta),
                None => return,
            }
        }
    }
}

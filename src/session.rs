//! Session state machine.
//!
//! A [`Session`] keeps one external service attached to the catalogue server.
//! A single control task reacts to transport signals and liveness failures:
//!
//! - "connected": run startup (readiness, login, registration, control and
//!   data subscriptions), then start the liveness monitor
//! - "disconnected": stop the monitor, release every subscription and
//!   observer, emit `connection-closed`
//! - startup failure: report it, tear down, disconnect, and reconnect after
//!   the reconnect interval
//! - liveness failure: report it, tear down, and reconnect at once
//!
//! Startup is raced against the signal stream, so a drop during startup
//! interrupts it at its current step.

use crate::{
    action_ack::ActionAck,
    config::{LivenessMode, SessionConfig},
    error::{LinkError, Result},
    event_handlers::{ConnectionError, EventHandlers},
    liveness::{Epoch, HttpStatusProbe, LivenessFailure, LivenessMonitor, LivenessProbe, RpcPingProbe},
    models::{ActionRecord, CollectionDelta, DeltaKind, ServiceRegistration, SessionPhase},
    orchestrator::SubscriptionOrchestrator,
    timeouts::LinkTimeouts,
    transport::{DdpTransport, Transport, TransportSignal},
};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// Commands for the control task.
enum SessionCmd {
    /// A liveness monitor failed. Ignored unless `generation` is current.
    LivenessFailed {
        generation: u64,
        failure: LivenessFailure,
    },
    Shutdown {
        done_tx: Option<oneshot::Sender<()>>,
    },
}

/// Builder for [`Session`].
#[derive(Default)]
pub struct SessionBuilder {
    config: Option<SessionConfig>,
    transport: Option<Arc<dyn Transport>>,
    probe: Option<Arc<dyn LivenessProbe>>,
}

impl SessionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit configuration. Without one, the configuration is resolved
    /// from the `config` and `development` environment variables.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom transport instead of the bundled DDP client.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a custom liveness probe instead of the one selected by
    /// [`SessionConfig::liveness`].
    pub fn liveness_probe(mut self, probe: Arc<dyn LivenessProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Resolve and validate the configuration, then assemble the session.
    ///
    /// Fails with [`LinkError::ConfigurationError`] before anything connects.
    pub fn build(self) -> Result<Session> {
        let config = SessionConfig::resolve(self.config)?;
        config.validate()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(DdpTransport::from_config(&config)?),
        };

        let probe: Option<Arc<dyn LivenessProbe>> = match self.probe {
            Some(probe) => Some(probe),
            None => match config.liveness {
                LivenessMode::HttpStatus => Some(Arc::new(HttpStatusProbe::from_config(&config)?)),
                LivenessMode::RpcPing => Some(Arc::new(RpcPingProbe::new(transport.clone()))),
                LivenessMode::Disabled => None,
            },
        };

        Ok(Session::assemble(config, transport, probe))
    }
}

/// Connection to the catalogue server on behalf of one external service.
///
/// # Example
///
/// ```rust,no_run
/// use catalogue_link::{Session, SessionConfig};
/// use serde_json::json;
///
/// # async fn example() -> catalogue_link::Result<()> {
/// let session = Session::builder()
///     .config(
///         SessionConfig::new("wss://catalogue.example.org", "service-token")
///             .with_service_description(json!({"name": "thermostat-bridge"})),
///     )
///     .build()?;
///
/// session
///     .on_connection_opened(|| println!("connected"))
///     .on_data_changed(|collection, delta| println!("{}: {:?}", collection, delta))
///     .on_action_added(|action, ack| {
///         println!("action {}", action.id);
///         ack.reply_detached(Some(json!({"ok": true})), None);
///     });
///
/// session.start().await?;
/// # Ok(())
/// # }
/// ```
pub struct Session {
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    handlers: Arc<EventHandlers>,
    phase_rx: watch::Receiver<SessionPhase>,
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
    control: Mutex<Option<ControlLoop>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::new()
    }

    /// Session over the bundled DDP transport for an explicit configuration.
    pub fn new(config: SessionConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    /// Session configured from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::builder().build()
    }

    fn assemble(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        probe: Option<Arc<dyn LivenessProbe>>,
    ) -> Self {
        let handlers = Arc::new(EventHandlers::new());
        let (phase_tx, phase_rx) = watch::channel(SessionPhase::Idle);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();

        let control = ControlLoop {
            orchestrator: SubscriptionOrchestrator::new(
                transport.clone(),
                config.clone(),
                handlers.clone(),
            ),
            transport: transport.clone(),
            probe,
            handlers: handlers.clone(),
            timeouts: config.timeouts.clone(),
            phase_tx,
            cmd_tx: cmd_tx.clone(),
            cmd_rx,
            monitor: None,
            generation: 0,
        };

        Self {
            config,
            transport,
            handlers,
            phase_rx,
            cmd_tx,
            control: Mutex::new(Some(control)),
            task: Mutex::new(None),
        }
    }

    /// Resolved configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Handler registry for this session.
    pub fn handlers(&self) -> &EventHandlers {
        &self.handlers
    }

    pub fn on_connection_opened(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.handlers.on_connection_opened(f);
        self
    }

    pub fn on_connection_closed(&self, f: impl Fn() + Send + Sync + 'static) -> &Self {
        self.handlers.on_connection_closed(f);
        self
    }

    pub fn on_service_subscribed(
        &self,
        f: impl Fn(&ServiceRegistration) + Send + Sync + 'static,
    ) -> &Self {
        self.handlers.on_service_subscribed(f);
        self
    }

    /// Register a handler for newly queued actions. Reply through the
    /// [`ActionAck`]; only the first reply is sent.
    pub fn on_action_added(
        &self,
        f: impl Fn(&ActionRecord, ActionAck) + Send + Sync + 'static,
    ) -> &Self {
        self.handlers.on_action_added(f);
        self
    }

    pub fn on_data_changed(
        &self,
        f: impl Fn(&str, &CollectionDelta) + Send + Sync + 'static,
    ) -> &Self {
        self.handlers.on_data_changed(f);
        self
    }

    pub fn on_queue_changed(
        &self,
        f: impl Fn(&CollectionDelta, &[DeltaKind]) + Send + Sync + 'static,
    ) -> &Self {
        self.handlers.on_queue_changed(f);
        self
    }

    pub fn on_error(&self, f: impl Fn(&ConnectionError) + Send + Sync + 'static) -> &Self {
        self.handlers.on_error(f);
        self
    }

    /// Spawn the control task and ask the transport to connect.
    ///
    /// A session starts once; after [`shutdown`](Self::shutdown) build a new one.
    pub async fn start(&self) -> Result<()> {
        let control = self
            .control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| LinkError::InternalError("Session already started".to_string()))?;

        // Listen before connecting so the first "connected" is not missed.
        let signals = self.transport.signals();
        let task = tokio::spawn(control.run(signals));
        *self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);

        log::info!("[session] Starting session for {:?}", self.config.socket_address);
        self.transport.connect().await
    }

    /// Tear everything down, disconnect the transport and stop the control
    /// task. Does nothing when the session never started.
    pub async fn shutdown(&self) -> Result<()> {
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(task) = task else {
            return Ok(());
        };

        let (done_tx, done_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(SessionCmd::Shutdown {
                done_tx: Some(done_tx),
            })
            .is_ok()
        {
            let _ = done_rx.await;
        }
        task.await
            .map_err(|e| LinkError::InternalError(format!("Session task failed: {}", e)))
    }

    /// Invoke a remote method on the current connection.
    pub async fn call(&self, method: &str, params: Vec<JsonValue>) -> Result<JsonValue> {
        self.transport.call(method, params).await
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> SessionPhase {
        *self.phase_rx.borrow()
    }

    /// Receiver that observes every phase change.
    pub fn watch_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase_rx.clone()
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("socket_address", &self.config.socket_address)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(SessionCmd::Shutdown { done_tx: None });
    }
}

/// Outcome of a startup run raced against signals and commands.
enum StartupOutcome {
    Finished(Result<Option<Epoch>>),
    Interrupted,
    ShutdownRequested(Option<oneshot::Sender<()>>),
}

/// State owned by the control task.
struct ControlLoop {
    transport: Arc<dyn Transport>,
    probe: Option<Arc<dyn LivenessProbe>>,
    handlers: Arc<EventHandlers>,
    timeouts: LinkTimeouts,
    orchestrator: SubscriptionOrchestrator,
    phase_tx: watch::Sender<SessionPhase>,
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCmd>,
    monitor: Option<LivenessMonitor>,
    generation: u64,
}

impl ControlLoop {
    async fn run(mut self, mut signals: mpsc::UnboundedReceiver<TransportSignal>) {
        loop {
            tokio::select! {
                signal = signals.recv() => match signal {
                    Some(TransportSignal::Connected) => {
                        if !self.on_connected(&mut signals).await {
                            return;
                        }
                    },
                    Some(TransportSignal::Disconnected) => self.on_disconnected().await,
                    Some(TransportSignal::Error(message)) => self.report(&message),
                    None => {
                        log::warn!("[session] Transport signal stream ended");
                        self.stop_monitor();
                        self.orchestrator.teardown().await;
                        self.mark_closed();
                        return;
                    },
                },

                cmd = self.cmd_rx.recv() => match cmd {
                    Some(SessionCmd::LivenessFailed { generation, failure }) => {
                        if generation == self.generation && self.monitor.is_some() {
                            self.force_disconnect(&format!("Connection lost: {}", failure)).await;
                            self.request_connect().await;
                        } else {
                            log::debug!(
                                "[session] Ignoring failure from stale monitor #{} ({})",
                                generation,
                                failure
                            );
                        }
                    },
                    Some(SessionCmd::Shutdown { done_tx }) => {
                        self.shutdown().await;
                        if let Some(tx) = done_tx {
                            let _ = tx.send(());
                        }
                        return;
                    },
                    None => {
                        self.shutdown().await;
                        return;
                    },
                },
            }
        }
    }

    /// Returns `false` when the task should exit.
    async fn on_connected(
        &mut self,
        signals: &mut mpsc::UnboundedReceiver<TransportSignal>,
    ) -> bool {
        let phase = *self.phase_tx.borrow();
        if !phase.accepts_connect() {
            log::debug!("[session] Ignoring 'connected' while {}", phase);
            return true;
        }

        log::info!("[session] Transport connected");
        self.phase_tx.send_replace(SessionPhase::Connecting);
        self.handlers.emit_connection_opened();

        let outcome = {
            let startup = self
                .orchestrator
                .startup(self.probe.as_deref(), &self.phase_tx);
            tokio::pin!(startup);

            loop {
                tokio::select! {
                    result = &mut startup => break StartupOutcome::Finished(result),

                    signal = signals.recv() => match signal {
                        Some(TransportSignal::Disconnected) | None => {
                            break StartupOutcome::Interrupted;
                        },
                        Some(TransportSignal::Error(message)) => {
                            log::warn!("[session] Transport error: {}", message);
                            self.handlers.emit_error(ConnectionError::new(message, true));
                        },
                        Some(TransportSignal::Connected) => {
                            log::debug!("[session] Duplicate 'connected' during startup");
                        },
                    },

                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(SessionCmd::Shutdown { done_tx }) => {
                            break StartupOutcome::ShutdownRequested(done_tx);
                        },
                        Some(SessionCmd::LivenessFailed { generation, .. }) => {
                            log::debug!(
                                "[session] Ignoring failure from stale monitor #{} during startup",
                                generation
                            );
                        },
                        None => break StartupOutcome::ShutdownRequested(None),
                    },
                }
            }
        };

        match outcome {
            StartupOutcome::Finished(Ok(baseline)) => {
                self.phase_tx.send_replace(SessionPhase::Online);
                self.start_monitor(baseline);
                log::info!("[session] Online");
                true
            },
            StartupOutcome::Finished(Err(e)) => {
                self.force_disconnect(&format!("Startup failed: {}", e)).await;
                self.reconnect_after(self.timeouts.reconnect_interval).await
            },
            StartupOutcome::Interrupted => {
                log::info!("[session] Disconnected during startup");
                self.on_disconnected().await;
                true
            },
            StartupOutcome::ShutdownRequested(done_tx) => {
                self.shutdown().await;
                if let Some(tx) = done_tx {
                    let _ = tx.send(());
                }
                false
            },
        }
    }

    async fn on_disconnected(&mut self) {
        self.stop_monitor();
        self.orchestrator.teardown().await;
        self.mark_closed();
    }

    /// Publish `Disconnected`; emit `connection-closed` once per open interval.
    fn mark_closed(&mut self) {
        let phase = *self.phase_tx.borrow();
        if matches!(phase, SessionPhase::Idle | SessionPhase::Disconnected) {
            return;
        }
        self.phase_tx.send_replace(SessionPhase::Disconnected);
        log::info!("[session] Connection closed");
        self.handlers.emit_connection_closed();
    }

    async fn force_disconnect(&mut self, reason: &str) {
        log::warn!("[session] {}; forcing reconnect", reason);
        self.report(reason);
        self.on_disconnected().await;

        if let Err(e) = self.transport.disconnect().await {
            log::warn!("[session] Disconnect failed: {}", e);
        }
    }

    async fn request_connect(&mut self) {
        if let Err(e) = self.transport.connect().await {
            log::warn!("[session] Reconnect request failed: {}", e);
            self.report(&format!("Reconnect request failed: {}", e));
        }
    }

    /// Wait `delay`, then ask the transport to connect again.
    ///
    /// Returns `false` when a shutdown arrived during the wait.
    async fn reconnect_after(&mut self, delay: Duration) -> bool {
        if !delay.is_zero() {
            log::info!("[session] Reconnecting in {:?}", delay);
            let wait = tokio::time::sleep(delay);
            tokio::pin!(wait);

            loop {
                tokio::select! {
                    _ = &mut wait => break,

                    cmd = self.cmd_rx.recv() => match cmd {
                        Some(SessionCmd::Shutdown { done_tx }) => {
                            self.shutdown().await;
                            if let Some(tx) = done_tx {
                                let _ = tx.send(());
                            }
                            return false;
                        },
                        Some(SessionCmd::LivenessFailed { generation, .. }) => {
                            log::debug!(
                                "[session] Ignoring failure from stale monitor #{} while waiting",
                                generation
                            );
                        },
                        None => {
                            self.shutdown().await;
                            return false;
                        },
                    },
                }
            }
        }

        self.request_connect().await;
        true
    }

    async fn shutdown(&mut self) {
        log::info!("[session] Shutting down");
        self.stop_monitor();
        self.orchestrator.teardown().await;
        if let Err(e) = self.transport.disconnect().await {
            log::warn!("[session] Disconnect failed: {}", e);
        }
        self.mark_closed();
    }

    fn report(&self, message: &str) {
        self.handlers.emit_error(ConnectionError::new(message, true));
    }

    fn start_monitor(&mut self, baseline: Option<Epoch>) {
        let Some(probe) = self.probe.clone() else {
            return;
        };
        if self.timeouts.probe_interval.is_zero() {
            log::debug!("[session] Liveness probing disabled (zero interval)");
            return;
        }

        self.generation += 1;
        let generation = self.generation;
        let cmd_tx = self.cmd_tx.clone();
        self.monitor = Some(LivenessMonitor::start(
            probe,
            baseline,
            self.timeouts.probe_interval,
            self.timeouts.probe_timeout,
            move |failure| {
                let _ = cmd_tx.send(SessionCmd::LivenessFailed {
                    generation,
                    failure,
                });
            },
        ));
        log::debug!("[session] Liveness monitor #{} started", generation);
    }

    fn stop_monitor(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
    }
}

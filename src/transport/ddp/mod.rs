//! DDP-over-WebSocket transport.
//!
//! Provides a single WebSocket connection to a DDP server that:
//!
//! - performs the DDP `connect` handshake and answers server pings
//! - multiplexes method calls and subscriptions by id
//! - keeps a local document cache per collection and reports every change to
//!   collection observers as a [`CollectionDelta`](crate::models::CollectionDelta)
//! - reconnects on its own after an unexpected drop, at a fixed interval
//!
//! # Example
//!
//! ```rust,no_run
//! use catalogue_link::{transport::{DdpTransport, Transport, TransportSignal}, LinkTimeouts};
//!
//! # async fn example() -> catalogue_link::Result<()> {
//! let transport = DdpTransport::new("ws://127.0.0.1:3000/websocket", LinkTimeouts::default());
//! let mut signals = transport.signals();
//! transport.connect().await?;
//!
//! if let Some(TransportSignal::Connected) = signals.recv().await {
//!     let names = transport.call("getUserDataCollectionNames", vec![]).await?;
//!     println!("{}", names);
//! }
//! # Ok(())
//! # }
//! ```

mod collections;
mod connection;
pub mod messages;

use self::connection::{connection_task, DdpCmd, Shared, SubState};
use crate::{
    config::SessionConfig,
    error::{LinkError, Result},
    timeouts::LinkTimeouts,
    transport::{CollectionObserver, DeltaCallback, SubscriptionHandle, Transport, TransportSignal},
};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// DDP client over a single WebSocket.
///
/// The background connection task is spawned by the first
/// [`connect`](Transport::connect) call, so construction needs no runtime.
pub struct DdpTransport {
    url: String,
    timeouts: LinkTimeouts,
    shared: Arc<Shared>,
    cmd_tx: mpsc::UnboundedSender<DdpCmd>,
    cmd_rx: Mutex<Option<mpsc::UnboundedReceiver<DdpCmd>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    next_sub_id: AtomicU64,
}

impl DdpTransport {
    /// Transport for an explicit DDP endpoint (`ws://host/websocket`).
    pub fn new(url: impl Into<String>, timeouts: LinkTimeouts) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        Self {
            url: url.into(),
            timeouts,
            shared: Arc::new(Shared::default()),
            cmd_tx,
            cmd_rx: Mutex::new(Some(cmd_rx)),
            task: Mutex::new(None),
            next_sub_id: AtomicU64::new(0),
        }
    }

    /// Transport for the endpoint and timeouts of a session configuration.
    pub fn from_config(config: &SessionConfig) -> Result<Self> {
        Ok(Self::new(config.websocket_url()?, config.timeouts.clone()))
    }

    /// DDP endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_some()
    }

    fn ensure_task(&self) {
        let mut task = self.task.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.is_some() {
            return;
        }
        let cmd_rx = self
            .cmd_rx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(cmd_rx) = cmd_rx {
            log::debug!("[ddp] Starting connection task for {}", self.url);
            *task = Some(tokio::spawn(connection_task(
                cmd_rx,
                self.url.clone(),
                self.timeouts.clone(),
                self.shared.clone(),
            )));
        }
    }

    fn send_cmd(&self, cmd: DdpCmd) -> Result<()> {
        if !self.is_running() {
            return Err(LinkError::NotConnected);
        }
        self.cmd_tx.send(cmd).map_err(|_| {
            LinkError::WebSocketError("Connection task is not running".to_string())
        })
    }
}

impl fmt::Debug for DdpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DdpTransport")
            .field("url", &self.url)
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for DdpTransport {
    fn drop(&mut self) {
        let _ = self.cmd_tx.send(DdpCmd::Shutdown);
    }
}

#[async_trait]
impl Transport for DdpTransport {
    fn signals(&self) -> mpsc::UnboundedReceiver<TransportSignal> {
        self.shared.add_listener()
    }

    async fn connect(&self) -> Result<()> {
        self.ensure_task();
        self.send_cmd(DdpCmd::Connect)
    }

    async fn disconnect(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.send_cmd(DdpCmd::Disconnect { done_tx })?;
        done_rx.await.map_err(|_| {
            LinkError::WebSocketError("Connection task exited during disconnect".to_string())
        })
    }

    async fn call(&self, method: &str, params: Vec<JsonValue>) -> Result<JsonValue> {
        let (result_tx, result_rx) = oneshot::channel();
        self.send_cmd(DdpCmd::Call {
            method: method.to_string(),
            params,
            result_tx,
        })?;

        let outcome = async {
            match result_rx.await {
                Ok(result) => result,
                Err(_) => Err(LinkError::NotConnected),
            }
        };
        let timeout = self.timeouts.call_timeout;
        if LinkTimeouts::is_no_timeout(timeout) {
            return outcome.await;
        }
        tokio::time::timeout(timeout, outcome).await.map_err(|_| {
            LinkError::TimeoutError(format!("'{}' did not answer within {:?}", method, timeout))
        })?
    }

    async fn subscribe(
        &self,
        name: &str,
        params: Vec<JsonValue>,
    ) -> Result<Box<dyn SubscriptionHandle>> {
        let id = format!("sub-{}", self.next_sub_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (state_tx, state_rx) = watch::channel(SubState::Pending);
        self.send_cmd(DdpCmd::Subscribe {
            id: id.clone(),
            name: name.to_string(),
            params,
            state_tx,
        })?;

        Ok(Box::new(DdpSubscription {
            id,
            name: name.to_string(),
            state_rx,
            cmd_tx: self.cmd_tx.clone(),
            removed: AtomicBool::new(false),
        }))
    }

    fn observe(&self, collection: &str, on_change: DeltaCallback) -> Box<dyn CollectionObserver> {
        let id = self.shared.observers().register(collection, on_change);
        log::debug!("[ddp] Observing collection '{}'", collection);
        Box::new(DdpObserver {
            id,
            collection: collection.to_string(),
            shared: self.shared.clone(),
        })
    }
}

/// Handle for one `sub` frame.
struct DdpSubscription {
    id: String,
    name: String,
    state_rx: watch::Receiver<SubState>,
    cmd_tx: mpsc::UnboundedSender<DdpCmd>,
    removed: AtomicBool,
}

#[async_trait]
impl SubscriptionHandle for DdpSubscription {
    fn name(&self) -> &str {
        &self.name
    }

    async fn ready(&self) -> Result<()> {
        let mut state_rx = self.state_rx.clone();
        let state = state_rx
            .wait_for(|state| !matches!(state, SubState::Pending))
            .await
            .map_err(|_| LinkError::NotConnected)?
            .clone();
        match state {
            SubState::Ready => Ok(()),
            SubState::Failed(e) => Err(e),
            SubState::Pending => Err(LinkError::InternalError(format!(
                "Subscription '{}' still pending",
                self.name
            ))),
        }
    }

    async fn remove(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.cmd_tx.send(DdpCmd::Unsubscribe {
            id: self.id.clone(),
        });
    }
}

/// Handle for one registered collection observer.
struct DdpObserver {
    id: u64,
    collection: String,
    shared: Arc<Shared>,
}

impl CollectionObserver for DdpObserver {
    fn collection(&self) -> &str {
        &self.collection
    }

    fn stop(&self) {
        if self.shared.observers().unregister(self.id) {
            log::debug!("[ddp] Stopped observing '{}'", self.collection);
        }
    }
}

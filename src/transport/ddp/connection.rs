//! Background task owning the DDP WebSocket.
//!
//! All socket I/O, pending method calls, subscription state and the document
//! cache live in this task. The public [`DdpTransport`](super::DdpTransport)
//! talks to it through [`DdpCmd`] messages.
//!
//! Lifecycle:
//! 1. Idle until the first `Connect` command
//! 2. Dial, send the DDP `connect` frame, wait for `connected`
//! 3. Event loop: socket frames + commands
//! 4. On an unexpected drop: fail pending work, clear the cache, emit
//!    `Disconnected`, then redial every `reconnect_interval`
//! 5. After `Disconnect`: stay idle until the next `Connect`

use super::{
    collections::{DocumentCache, ObserverRegistry},
    messages::{parse_server_message, ClientMessage, ServerMessage},
};
use crate::{
    error::{LinkError, Result},
    models::CollectionDelta,
    timeouts::LinkTimeouts,
    transport::TransportSignal,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::Message;

pub(super) type WebSocketStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<TcpStream>>;

/// Readiness of one subscription, published to its handle.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum SubState {
    Pending,
    Ready,
    Failed(LinkError),
}

/// Commands sent from the public API to the background task.
pub(super) enum DdpCmd {
    /// Connect now, and keep reconnecting after drops.
    Connect,
    /// Close the socket and stop reconnecting.
    Disconnect { done_tx: oneshot::Sender<()> },
    Call {
        method: String,
        params: Vec<JsonValue>,
        result_tx: oneshot::Sender<Result<JsonValue>>,
    },
    Subscribe {
        id: String,
        name: String,
        params: Vec<JsonValue>,
        state_tx: watch::Sender<SubState>,
    },
    Unsubscribe { id: String },
    Shutdown,
}

/// State shared between the task and the public handles.
#[derive(Default)]
pub(super) struct Shared {
    listeners: Mutex<Vec<mpsc::UnboundedSender<TransportSignal>>>,
    observers: Mutex<ObserverRegistry>,
}

impl Shared {
    pub(super) fn add_listener(&self) -> mpsc::UnboundedReceiver<TransportSignal> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.listeners).push(tx);
        rx
    }

    pub(super) fn emit(&self, signal: TransportSignal) {
        log::debug!("[ddp] Signal: {}", signal);
        lock(&self.listeners).retain(|tx| tx.send(signal.clone()).is_ok());
    }

    pub(super) fn observers(&self) -> MutexGuard<'_, ObserverRegistry> {
        lock(&self.observers)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct PendingCall {
    method: String,
    result_tx: oneshot::Sender<Result<JsonValue>>,
}

struct SubEntry {
    name: String,
    state_tx: watch::Sender<SubState>,
}

/// Per-connection state. Everything here is dropped when the socket closes.
#[derive(Default)]
struct Session {
    pending: HashMap<String, PendingCall>,
    subs: HashMap<String, SubEntry>,
    cache: DocumentCache,
    next_method_id: u64,
}

impl Session {
    fn next_id(&mut self) -> String {
        self.next_method_id += 1;
        self.next_method_id.to_string()
    }

    /// Fail everything still waiting on the connection and forget all state.
    fn reset(&mut self) {
        for (_, call) in self.pending.drain() {
            let _ = call.result_tx.send(Err(LinkError::NotConnected));
        }
        for (_, entry) in self.subs.drain() {
            entry.state_tx.send_if_modified(|state| {
                if matches!(state, SubState::Pending) {
                    *state = SubState::Failed(LinkError::NotConnected);
                    true
                } else {
                    false
                }
            });
        }
        self.cache.clear();
        self.next_method_id = 0;
    }
}

/// Dial the endpoint and complete the DDP handshake, bounded by the
/// connection timeout.
async fn establish(url: &str, timeouts: &LinkTimeouts) -> Result<WebSocketStream> {
    log::debug!("[ddp] Connecting to {}", url);

    if LinkTimeouts::is_no_timeout(timeouts.connection_timeout) {
        return dial(url).await;
    }
    tokio::time::timeout(timeouts.connection_timeout, dial(url))
        .await
        .map_err(|_| {
            LinkError::TimeoutError(format!(
                "Connection timeout ({:?})",
                timeouts.connection_timeout
            ))
        })?
}

async fn dial(url: &str) -> Result<WebSocketStream> {
    let (mut ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| LinkError::WebSocketError(format!("Connection failed: {}", e)))?;

    send_frame(&mut ws, &ClientMessage::connect()).await?;

    while let Some(frame) = ws.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Ping(payload)) => {
                let _ = ws.send(Message::Pong(payload)).await;
                continue;
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                return Err(LinkError::WebSocketError(format!("Handshake failed: {}", e)));
            },
        };
        match parse_server_message(&text)? {
            Some(ServerMessage::Connected { session }) => {
                log::info!("[ddp] Connected (session {})", session);
                return Ok(ws);
            },
            Some(ServerMessage::Failed { version }) => {
                return Err(LinkError::WebSocketError(format!(
                    "Server refused DDP version (suggested {:?})",
                    version
                )));
            },
            Some(ServerMessage::Ping { id }) => {
                send_frame(&mut ws, &ClientMessage::Pong { id }).await?;
            },
            _ => {},
        }
    }
    Err(LinkError::WebSocketError(
        "Connection closed during DDP handshake".to_string(),
    ))
}

async fn send_frame(ws: &mut WebSocketStream, msg: &ClientMessage) -> Result<()> {
    let payload = msg.to_json()?;
    ws.send(Message::Text(payload.into()))
        .await
        .map_err(|e| LinkError::WebSocketError(format!("Failed to send frame: {}", e)))
}

/// Answer a command that arrived while no socket is open.
fn reject_offline(cmd: DdpCmd) {
    match cmd {
        DdpCmd::Call { method, result_tx, .. } => {
            log::debug!("[ddp] Rejecting call '{}': not connected", method);
            let _ = result_tx.send(Err(LinkError::NotConnected));
        },
        DdpCmd::Subscribe { name, state_tx, .. } => {
            log::debug!("[ddp] Rejecting subscription '{}': not connected", name);
            state_tx.send_replace(SubState::Failed(LinkError::NotConnected));
        },
        DdpCmd::Disconnect { done_tx } => {
            let _ = done_tx.send(());
        },
        DdpCmd::Unsubscribe { .. } | DdpCmd::Connect | DdpCmd::Shutdown => {},
    }
}

/// Outcome of handling one event while connected.
enum Flow {
    Continue,
    /// Socket lost or closed by request.
    Dropped,
    Shutdown,
}

pub(super) async fn connection_task(
    mut cmd_rx: mpsc::UnboundedReceiver<DdpCmd>,
    url: String,
    timeouts: LinkTimeouts,
    shared: Arc<Shared>,
) {
    let mut ws_stream: Option<WebSocketStream> = None;
    let mut session = Session::default();
    let mut want_connected = false;
    let mut retry_delay: Option<Duration> = None;

    loop {
        if let Some(ws) = ws_stream.as_mut() {
            let flow = tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(DdpCmd::Disconnect { done_tx }) => {
                            log::info!("[ddp] Disconnect requested");
                            let _ = ws.close(None).await;
                            want_connected = false;
                            close_session(&mut session, &shared);
                            ws_stream = None;
                            let _ = done_tx.send(());
                            continue;
                        },
                        Some(DdpCmd::Shutdown) | None => Flow::Shutdown,
                        Some(cmd) => handle_command(cmd, ws, &mut session).await,
                    }
                }

                frame = ws.next() => handle_frame(frame, ws, &mut session, &shared).await,
            };

            match flow {
                Flow::Continue => {},
                Flow::Dropped => {
                    close_session(&mut session, &shared);
                    ws_stream = None;
                    retry_delay = Some(timeouts.reconnect_interval);
                },
                Flow::Shutdown => {
                    let _ = ws.close(None).await;
                    close_session(&mut session, &shared);
                    return;
                },
            }
        } else if want_connected {
            if let Some(delay) = retry_delay.take() {
                log::info!("[ddp] Reconnecting in {:?}", delay);
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);

                let mut interrupted = false;
                loop {
                    tokio::select! {
                        biased;
                        cmd = cmd_rx.recv() => match cmd {
                            Some(DdpCmd::Connect) => {
                                // dial right away
                                break;
                            },
                            Some(DdpCmd::Disconnect { done_tx }) => {
                                want_connected = false;
                                let _ = done_tx.send(());
                                interrupted = true;
                                break;
                            },
                            Some(DdpCmd::Shutdown) | None => return,
                            Some(cmd) => reject_offline(cmd),
                        },
                        _ = &mut sleep => break,
                    }
                }
                if interrupted {
                    continue;
                }
            }

            match establish(&url, &timeouts).await {
                Ok(ws) => {
                    ws_stream = Some(ws);
                    shared.emit(TransportSignal::Connected);
                },
                Err(e) => {
                    log::warn!("[ddp] Connection attempt failed: {}", e);
                    shared.emit(TransportSignal::Error(e.to_string()));
                    retry_delay = Some(timeouts.reconnect_interval);
                },
            }
        } else {
            match cmd_rx.recv().await {
                Some(DdpCmd::Connect) => {
                    want_connected = true;
                    retry_delay = None;
                },
                Some(DdpCmd::Shutdown) | None => return,
                Some(cmd) => reject_offline(cmd),
            }
        }
    }
}

/// Tear down per-connection state and tell listeners the socket is gone.
fn close_session(session: &mut Session, shared: &Shared) {
    session.reset();
    shared.emit(TransportSignal::Disconnected);
}

async fn handle_command(cmd: DdpCmd, ws: &mut WebSocketStream, session: &mut Session) -> Flow {
    match cmd {
        DdpCmd::Connect => Flow::Continue,
        DdpCmd::Call {
            method,
            params,
            result_tx,
        } => {
            let id = session.next_id();
            let frame = ClientMessage::Method {
                method: method.clone(),
                params,
                id: id.clone(),
            };
            match send_frame(ws, &frame).await {
                Ok(()) => {
                    log::debug!("[ddp] Calling '{}' (id {})", method, id);
                    session.pending.insert(id, PendingCall { method, result_tx });
                    Flow::Continue
                },
                Err(e) => {
                    let _ = result_tx.send(Err(e));
                    Flow::Dropped
                },
            }
        },
        DdpCmd::Subscribe {
            id,
            name,
            params,
            state_tx,
        } => {
            let frame = ClientMessage::Sub {
                id: id.clone(),
                name: name.clone(),
                params,
            };
            match send_frame(ws, &frame).await {
                Ok(()) => {
                    log::debug!("[ddp] Subscribing to '{}' (id {})", name, id);
                    session.subs.insert(id, SubEntry { name, state_tx });
                    Flow::Continue
                },
                Err(e) => {
                    state_tx.send_replace(SubState::Failed(e));
                    Flow::Dropped
                },
            }
        },
        DdpCmd::Unsubscribe { id } => {
            if let Some(entry) = session.subs.remove(&id) {
                log::debug!("[ddp] Unsubscribing '{}' (id {})", entry.name, id);
                if send_frame(ws, &ClientMessage::Unsub { id }).await.is_err() {
                    return Flow::Dropped;
                }
            }
            Flow::Continue
        },
        // Handled by the caller.
        DdpCmd::Disconnect { done_tx } => {
            let _ = done_tx.send(());
            Flow::Continue
        },
        DdpCmd::Shutdown => Flow::Shutdown,
    }
}

async fn handle_frame(
    frame: Option<std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ws: &mut WebSocketStream,
    session: &mut Session,
    shared: &Shared,
) -> Flow {
    match frame {
        // Oversized messages are rejected by tungstenite's default size
        // limits and surface as `Some(Err(_))`.
        Some(Ok(Message::Text(text))) => match parse_server_message(&text) {
            Ok(Some(msg)) => handle_message(msg, ws, session, shared).await,
            Ok(None) => Flow::Continue,
            Err(e) => {
                log::warn!("[ddp] Failed to parse frame: {}", e);
                Flow::Continue
            },
        },
        Some(Ok(Message::Ping(payload))) => {
            let _ = ws.send(Message::Pong(payload)).await;
            Flow::Continue
        },
        Some(Ok(Message::Close(frame))) => {
            log::info!("[ddp] Server closed connection: {:?}", frame);
            Flow::Dropped
        },
        Some(Ok(_)) => Flow::Continue,
        Some(Err(e)) => {
            log::warn!("[ddp] WebSocket error: {}", e);
            shared.emit(TransportSignal::Error(e.to_string()));
            Flow::Dropped
        },
        None => {
            log::info!("[ddp] WebSocket stream ended");
            Flow::Dropped
        },
    }
}

async fn handle_message(
    msg: ServerMessage,
    ws: &mut WebSocketStream,
    session: &mut Session,
    shared: &Shared,
) -> Flow {
    match msg {
        ServerMessage::Ping { id } => {
            if send_frame(ws, &ClientMessage::Pong { id }).await.is_err() {
                return Flow::Dropped;
            }
        },
        ServerMessage::MethodResult { id, result, error } => match session.pending.remove(&id) {
            Some(call) => {
                let outcome = match error {
                    Some(err) => Err(LinkError::RemoteError {
                        method: call.method,
                        message: err.to_string(),
                    }),
                    None => Ok(result.unwrap_or(JsonValue::Null)),
                };
                let _ = call.result_tx.send(outcome);
            },
            None => log::debug!("[ddp] Result for unknown call id {}", id),
        },
        ServerMessage::Ready { subs } => {
            for id in subs {
                if let Some(entry) = session.subs.get(&id) {
                    log::debug!("[ddp] Subscription '{}' ready", entry.name);
                    entry.state_tx.send_replace(SubState::Ready);
                }
            }
        },
        ServerMessage::Nosub { id, error } => {
            if let Some(entry) = session.subs.remove(&id) {
                let message = error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "subscription stopped by server".to_string());
                log::warn!("[ddp] Subscription '{}' ended: {}", entry.name, message);
                entry.state_tx.send_replace(SubState::Failed(LinkError::SubscriptionError {
                    name: entry.name,
                    message,
                }));
            }
        },
        ServerMessage::Added {
            collection,
            id,
            fields,
        } => {
            let delta = session.cache.added(&collection, &id, fields);
            deliver(shared, &collection, delta);
        },
        ServerMessage::Changed {
            collection,
            id,
            fields,
            cleared,
        } => {
            let delta = session.cache.changed(&collection, &id, fields, cleared);
            deliver(shared, &collection, delta);
        },
        ServerMessage::Removed { collection, id } => {
            let delta = session.cache.removed(&collection, &id);
            deliver(shared, &collection, delta);
        },
        ServerMessage::Error {
            reason,
            offending_message,
        } => {
            let reason = reason.unwrap_or_else(|| "unspecified protocol error".to_string());
            log::warn!("[ddp] Server error: {} ({:?})", reason, offending_message);
            shared.emit(TransportSignal::Error(reason));
        },
        ServerMessage::Connected { .. }
        | ServerMessage::Failed { .. }
        | ServerMessage::Pong { .. }
        | ServerMessage::Updated { .. }
        | ServerMessage::Unknown => {},
    }
    Flow::Continue
}

fn deliver(shared: &Shared, collection: &str, delta: CollectionDelta) {
    let callbacks = shared.observers().callbacks_for(collection);
    if callbacks.is_empty() {
        return;
    }
    for cb in callbacks {
        cb(delta.clone());
    }
}

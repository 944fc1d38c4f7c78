//! One-shot acknowledgement for control-channel actions.

use crate::{error::Result, protocol::METHOD_ACTION_CALLBACK, transport::Transport};
use serde_json::Value as JsonValue;
use std::fmt;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Reply channel handed out with every `action-added` event.
///
/// The first [`reply`](ActionAck::reply) (or
/// [`reply_detached`](ActionAck::reply_detached)) sends exactly one
/// `actionCallback(actionId, result, error)` call. Every later reply, from
/// this value or any clone of it, is a no-op.
///
/// # Example
///
/// ```rust,no_run
/// # use catalogue_link::{Session, SessionConfig};
/// # fn example(session: &Session) {
/// session.on_action_added(|action, ack| {
///     let outcome = serde_json::json!({"handled": action.id});
///     ack.reply_detached(Some(outcome), None);
/// });
/// # }
/// ```
#[derive(Clone)]
pub struct ActionAck {
    inner: Arc<AckInner>,
}

struct AckInner {
    action_id: String,
    transport: Arc<dyn Transport>,
    used: AtomicBool,
}

impl ActionAck {
    pub(crate) fn new(action_id: impl Into<String>, transport: Arc<dyn Transport>) -> Self {
        Self {
            inner: Arc::new(AckInner {
                action_id: action_id.into(),
                transport,
                used: AtomicBool::new(false),
            }),
        }
    }

    /// Identifier of the action this acknowledgement answers.
    pub fn action_id(&self) -> &str {
        &self.inner.action_id
    }

    /// Whether a reply has already been sent (or started).
    pub fn is_used(&self) -> bool {
        self.inner.used.load(Ordering::SeqCst)
    }

    fn claim(&self) -> bool {
        let first = !self.inner.used.swap(true, Ordering::SeqCst);
        if !first {
            log::debug!(
                "[action] Ignoring repeated acknowledgement for action '{}'",
                self.inner.action_id
            );
        }
        first
    }

    fn callback_params(&self, result: Option<JsonValue>, error: Option<JsonValue>) -> Vec<JsonValue> {
        vec![
            JsonValue::String(self.inner.action_id.clone()),
            result.unwrap_or(JsonValue::Null),
            error.unwrap_or(JsonValue::Null),
        ]
    }

    /// Send the acknowledgement and wait for the server to accept it.
    ///
    /// Returns `Ok(false)` without calling the server when a reply was
    /// already sent.
    pub async fn reply(&self, result: Option<JsonValue>, error: Option<JsonValue>) -> Result<bool> {
        if !self.claim() {
            return Ok(false);
        }
        let params = self.callback_params(result, error);
        self.inner.transport.call(METHOD_ACTION_CALLBACK, params).await?;
        log::debug!("[action] Acknowledged action '{}'", self.inner.action_id);
        Ok(true)
    }

    /// Send the acknowledgement in the background, for use from synchronous
    /// event handlers. Failures are logged.
    ///
    /// Returns `false` when a reply was already sent or no Tokio runtime is
    /// available.
    pub fn reply_detached(&self, result: Option<JsonValue>, error: Option<JsonValue>) -> bool {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                log::warn!(
                    "[action] Cannot acknowledge action '{}' outside a Tokio runtime",
                    self.inner.action_id
                );
                return false;
            },
        };
        if !self.claim() {
            return false;
        }

        let params = self.callback_params(result, error);
        let inner = self.inner.clone();
        handle.spawn(async move {
            if let Err(e) = inner.transport.call(METHOD_ACTION_CALLBACK, params).await {
                log::warn!("[action] Acknowledgement for '{}' failed: {}", inner.action_id, e);
            }
        });
        true
    }
}

impl fmt::Debug for ActionAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionAck")
            .field("action_id", &self.inner.action_id)
            .field("used", &self.is_used())
            .finish()
    }
}

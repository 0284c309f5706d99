//! Agent conversation sessions.
//!
//! A [`Session`] is one agent conversation: it sends prompts, accumulates
//! streamed text, and exposes a small state machine driven by inbound
//! `session/update` notifications. The protocol-level status deliberately
//! has no `Paused` variant — pausing is a property of the persisted work
//! assignment (see [`crate::models::agent::AgentStatus`]), not of the live
//! protocol session.

pub mod manager;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::acp::client::{AcpClient, Subscription};
use crate::sync::lock;
use crate::{AppError, Result};

pub use manager::{SessionManager, SessionOptions};

/// Event broadcast capacity per session. Slow observers see `Lagged` and
/// catch up rather than blocking the dispatch loop.
const EVENT_CHANNEL_DEPTH: usize = 64;

// ── Status ───────────────────────────────────────────────────────────────────

/// Protocol-session lifecycle status.
///
/// `idle →(send)→ working →(complete)→ completed`;
/// `working →(error)→ failed`; `working →(cancel)→ idle`.
/// `completed` and `failed` are terminal: the session cannot be sent to
/// again (cancellation, by contrast, returns it to `idle`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No prompt in flight; the session accepts work.
    Idle,
    /// A prompt is in flight; the session must not be sent to again.
    Working,
    /// The agent completed its turn (or the local object was destroyed).
    Completed,
    /// The agent reported an error for this session.
    Failed,
}

impl SessionStatus {
    /// Whether the session can accept another prompt.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

// ── Events ───────────────────────────────────────────────────────────────────

/// Observable session events, re-emitted from inbound notifications.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A streamed text delta (already appended to the accumulated buffer).
    Text(String),
    /// The agent invoked a tool.
    ToolCall {
        /// Tool name.
        name: String,
        /// Tool input payload.
        payload: Value,
    },
    /// A tool produced a result.
    ToolResult {
        /// Tool name.
        name: String,
        /// Tool output payload.
        payload: Value,
    },
    /// The turn finished; carries the final text.
    Complete(String),
    /// The agent reported an error; carries the message.
    Error(String),
}

// ── Wire payload ─────────────────────────────────────────────────────────────

/// Notification kinds carried in `session/update`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum UpdateKind {
    Text,
    ToolCall,
    ToolResult,
    Complete,
    Error,
}

/// `session/update` notification parameters.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionUpdate {
    session_id: String,
    #[serde(rename = "type")]
    kind: UpdateKind,
    content: Option<String>,
    name: Option<String>,
    payload: Option<Value>,
    message: Option<String>,
}

// ── Session ──────────────────────────────────────────────────────────────────

struct SessionState {
    status: SessionStatus,
    accumulated: String,
}

struct SessionInner {
    session_id: String,
    client: AcpClient,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
    /// Ties this session to the client's `session/update` stream; taken by
    /// `destroy` to stop notification delivery.
    subscription: Mutex<Option<Subscription>>,
    prompt_timeout: Duration,
    control_timeout: Duration,
}

impl std::fmt::Debug for SessionInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionInner")
            .field("session_id", &self.session_id)
            .field("status", &lock(&self.state).status)
            .finish_non_exhaustive()
    }
}

/// One agent conversation. Cheaply cloneable; clones share state.
#[derive(Debug, Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Attach a session to the client's notification stream.
    ///
    /// `session_id` is the child-assigned identifier from the `session/new`
    /// (or `session/load`) response; only notifications carrying it mutate
    /// this session.
    #[must_use]
    pub fn attach(
        client: AcpClient,
        session_id: String,
        prompt_timeout: Duration,
        control_timeout: Duration,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);

        let inner = Arc::new(SessionInner {
            session_id,
            client,
            state: Mutex::new(SessionState {
                status: SessionStatus::Idle,
                accumulated: String::new(),
            }),
            events,
            subscription: Mutex::new(None),
            prompt_timeout,
            control_timeout,
        });

        let weak = Arc::downgrade(&inner);
        let subscription = inner.client.on_notification("session/update", move |params| {
            if let Some(inner) = weak.upgrade() {
                handle_update(&inner, params);
            }
        });
        *lock(&inner.subscription) = Some(subscription);

        Self { inner }
    }

    /// Child-assigned session identifier.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    /// Current protocol status.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        lock(&self.inner.state).status
    }

    /// Text accumulated from `text` notifications since the last send.
    #[must_use]
    pub fn accumulated_text(&self) -> String {
        lock(&self.inner.state).accumulated.clone()
    }

    /// Subscribe to this session's event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Send a prompt to the agent.
    ///
    /// Transitions to `working`, clears the accumulated buffer, and issues
    /// the `session/prompt` request in the background (a request failure
    /// marks the session `failed` and emits an error event). Returns a
    /// locally generated message id.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Agent`] (execution kind) without issuing any
    /// protocol request when the session is already `completed` or `failed`.
    pub fn send(&self, prompt: &str) -> Result<String> {
        {
            let mut state = lock(&self.inner.state);
            if state.status.is_terminal() {
                return Err(AppError::agent_execution(
                    format!(
                        "session {} is {:?} and cannot accept another prompt",
                        self.inner.session_id, state.status
                    ),
                    Some(self.inner.session_id.clone()),
                    None,
                ));
            }
            state.status = SessionStatus::Working;
            state.accumulated.clear();
        }

        let message_id = Uuid::new_v4().to_string();
        let inner = Arc::clone(&self.inner);
        let prompt = prompt.to_owned();

        tokio::spawn(async move {
            let params = json!({
                "sessionId": inner.session_id,
                "prompt": prompt,
            });

            if let Err(err) = inner
                .client
                .send_request("session/prompt", params, inner.prompt_timeout)
                .await
            {
                warn!(
                    session_id = %inner.session_id,
                    error = %err,
                    "session/prompt request failed"
                );
                let mut state = lock(&inner.state);
                // A completion notification may have landed before the
                // request settled; only an in-flight session fails here.
                if state.status == SessionStatus::Working {
                    state.status = SessionStatus::Failed;
                    drop(state);
                    let _ = inner.events.send(SessionEvent::Error(err.to_string()));
                }
            }
        });

        debug!(session_id = %self.inner.session_id, message_id, "prompt sent");
        Ok(message_id)
    }

    /// Send a prompt and wait for the turn to finish.
    ///
    /// Subscribes to the event stream before sending, then races the
    /// `complete`/`error` events against `timeout`. Intermediate `text` and
    /// tool events do not settle the wait. Exactly one settlement occurs and
    /// the temporary subscription is dropped on every path.
    ///
    /// # Errors
    ///
    /// - [`AppError::Agent`] (timeout kind) — no completion within `timeout`;
    ///   the recovery hint suggests decomposing the task.
    /// - [`AppError::Agent`] (execution kind) — the session emitted an error
    ///   event, or was already terminal when sending.
    pub async fn send_and_wait(&self, prompt: &str, timeout: Duration) -> Result<String> {
        // Subscribe first so a completion arriving between send and wait is
        // never missed.
        let mut events = self.subscribe();
        let _message_id = self.send(prompt)?;

        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(self.timeout_error(timeout));
            }

            match tokio::time::timeout(remaining, events.recv()).await {
                Err(_elapsed) => return Err(self.timeout_error(timeout)),
                Ok(Ok(SessionEvent::Complete(text))) => return Ok(text),
                Ok(Ok(SessionEvent::Error(message))) => {
                    return Err(AppError::agent_execution(
                        message,
                        Some(self.inner.session_id.clone()),
                        None,
                    ))
                }
                // Text and tool events stream through without settling.
                Ok(Ok(_)) => {}
                Ok(Err(broadcast::error::RecvError::Lagged(skipped))) => {
                    warn!(
                        session_id = %self.inner.session_id,
                        skipped,
                        "event stream lagged while waiting for completion"
                    );
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(AppError::agent_execution(
                        "session event stream closed before completion",
                        Some(self.inner.session_id.clone()),
                        None,
                    ))
                }
            }
        }
    }

    /// Cancel the in-flight turn.
    ///
    /// Issues a real `session/cancel` request to the agent; on success the
    /// session returns to `idle` and is reusable, unlike natural completion.
    ///
    /// # Errors
    ///
    /// Propagates transport failures from the cancel request.
    pub async fn cancel(&self) -> Result<()> {
        self.inner
            .client
            .send_request(
                "session/cancel",
                json!({ "sessionId": self.inner.session_id }),
                self.inner.control_timeout,
            )
            .await?;

        lock(&self.inner.state).status = SessionStatus::Idle;
        debug!(session_id = %self.inner.session_id, "session cancelled, back to idle");
        Ok(())
    }

    /// Release the local session object.
    ///
    /// Unsubscribes from notifications and marks the local object
    /// `completed`. The child-side session may still exist and can be
    /// reattached later via `session/load`.
    pub fn destroy(&self) {
        // Dropping the subscription removes the notification registration.
        drop(lock(&self.inner.subscription).take());
        lock(&self.inner.state).status = SessionStatus::Completed;
        debug!(session_id = %self.inner.session_id, "session destroyed");
    }

    fn timeout_error(&self, timeout: Duration) -> AppError {
        AppError::agent_timeout(
            format!(
                "session {} did not complete within {timeout:?}",
                self.inner.session_id
            ),
            Some(self.inner.session_id.clone()),
            None,
        )
    }
}

// ── Notification handling ────────────────────────────────────────────────────

/// Apply one `session/update` notification to a session.
///
/// Notifications for a different `sessionId` are ignored; routing is
/// `sessionId`-exclusive.
fn handle_update(inner: &Arc<SessionInner>, params: &Value) {
    let update: SessionUpdate = match serde_json::from_value(params.clone()) {
        Ok(update) => update,
        Err(err) => {
            debug!(error = %err, "skipping unrecognised session/update payload");
            return;
        }
    };

    if update.session_id != inner.session_id {
        return;
    }

    match update.kind {
        UpdateKind::Text => {
            let delta = update.content.unwrap_or_default();
            lock(&inner.state).accumulated.push_str(&delta);
            let _ = inner.events.send(SessionEvent::Text(delta));
        }
        UpdateKind::ToolCall => {
            let _ = inner.events.send(SessionEvent::ToolCall {
                name: update.name.unwrap_or_default(),
                payload: update.payload.unwrap_or(Value::Null),
            });
        }
        UpdateKind::ToolResult => {
            let _ = inner.events.send(SessionEvent::ToolResult {
                name: update.name.unwrap_or_default(),
                payload: update.payload.unwrap_or(Value::Null),
            });
        }
        UpdateKind::Complete => {
            let final_text = {
                let mut state = lock(&inner.state);
                state.status = SessionStatus::Completed;
                // The notification's content wins; fall back to the
                // accumulated buffer when it is omitted.
                update
                    .content
                    .unwrap_or_else(|| state.accumulated.clone())
            };
            let _ = inner.events.send(SessionEvent::Complete(final_text));
        }
        UpdateKind::Error => {
            lock(&inner.state).status = SessionStatus::Failed;
            let message = update
                .message
                .unwrap_or_else(|| "agent reported an unspecified error".into());
            let _ = inner.events.send(SessionEvent::Error(message));
        }
    }
}

//! ACP transport client.
//!
//! Owns the agent subprocess's stdin/stdout pipes and multiplexes all
//! protocol traffic over that single stream: outbound requests are written
//! as NDJSON frames and correlated to inbound responses through a
//! pending-request table keyed by request id; inbound notifications fan out
//! to every handler registered for their method; inbound requests
//! (`session/request_permission`) are answered on the same id through the
//! configured permission handler.
//!
//! The reader task (a [`FramedRead`] over [`AcpCodec`], same shape as the
//! stall-tolerant stream loops elsewhere in this codebase) buffers partial
//! lines, skips malformed ones, and on EOF or stream error rejects every
//! outstanding request so no caller is left hanging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::{AcpCodec, ResponseError, WireMessage};
use crate::acp::spawner::{spawn_agent, SpawnConfig};
use crate::sync::lock;
use crate::{AppError, Result};

/// Outbound frame channel depth. Writes beyond this apply backpressure to
/// request senders rather than buffering unboundedly.
const OUTBOUND_CHANNEL_DEPTH: usize = 64;

// ── Permission callback types ────────────────────────────────────────────────

/// An inbound `session/request_permission` request surfaced to the caller.
#[derive(Debug, Clone)]
pub struct PermissionRequest {
    /// Session the request belongs to, when the agent included one.
    pub session_id: Option<String>,
    /// Raw request parameters (tool name, affected paths, and so on).
    pub params: Value,
}

/// The caller's answer to a [`PermissionRequest`].
#[derive(Debug, Clone)]
pub struct PermissionDecision {
    /// Whether the requested action may proceed.
    pub approved: bool,
    /// Optional human-readable reason, echoed back to the agent.
    pub reason: Option<String>,
}

type NotificationHandler = Arc<dyn Fn(&Value) + Send + Sync>;
type DisconnectHandler = Arc<dyn Fn(&str) + Send + Sync>;
type PermissionHandler = Arc<dyn Fn(PermissionRequest) -> PermissionDecision + Send + Sync>;

// ── Subscriptions ────────────────────────────────────────────────────────────

/// Which handler table a [`Subscription`] belongs to.
#[derive(Debug, Clone)]
enum SubscriptionKey {
    Notification(String),
    Disconnect,
}

/// RAII handle for a registered handler.
///
/// Dropping the subscription removes exactly the registration that created
/// it; other handlers for the same method are unaffected.
#[derive(Debug)]
pub struct Subscription {
    inner: Weak<ClientInner>,
    key: SubscriptionKey,
    token: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let Some(inner) = self.inner.upgrade() else {
            return;
        };
        match &self.key {
            SubscriptionKey::Notification(method) => {
                let mut subs = lock(&inner.subscriptions);
                if let Some(handlers) = subs.get_mut(method) {
                    handlers.retain(|(token, _)| *token != self.token);
                    if handlers.is_empty() {
                        subs.remove(method);
                    }
                }
            }
            SubscriptionKey::Disconnect => {
                lock(&inner.disconnect_handlers).retain(|(token, _)| *token != self.token);
            }
        }
    }
}

// ── Client internals ─────────────────────────────────────────────────────────

struct ClientInner {
    /// Next request correlation id. Ids are unique among outstanding
    /// requests; reuse after settlement would be safe but never happens
    /// within a single process lifetime.
    next_id: AtomicU64,
    /// Next subscription token.
    next_token: AtomicU64,
    /// Pending-request table: id → single-fire completion handle. Owned
    /// exclusively by the client; exactly one of resolve, timeout-removal,
    /// or disconnect-rejection settles each entry.
    pending: Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>,
    /// Notification fan-out: method → list of (token, handler).
    subscriptions: Mutex<HashMap<String, Vec<(u64, NotificationHandler)>>>,
    /// Handlers fired once when the stream ends.
    disconnect_handlers: Mutex<Vec<(u64, DisconnectHandler)>>,
    /// Responder for inbound `session/request_permission` requests.
    permission_handler: Mutex<Option<PermissionHandler>>,
    /// Encoded outbound frames, consumed by the writer task.
    outbound: mpsc::Sender<String>,
    /// Cancels the reader and writer tasks.
    cancel: CancellationToken,
}

impl std::fmt::Debug for ClientInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientInner")
            .field("pending", &lock(&self.pending).len())
            .finish_non_exhaustive()
    }
}

impl ClientInner {
    /// Reject every outstanding request with `err` and clear the table.
    fn reject_all(&self, err: &AppError) {
        let entries: Vec<_> = lock(&self.pending).drain().collect();
        for (id, tx) in entries {
            debug!(request_id = id, "rejecting outstanding request");
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// Handle end-of-stream: reject all pending requests and notify
    /// disconnect subscribers.
    fn handle_disconnect(&self, reason: &str) {
        warn!(reason, "agent stream disconnected");
        self.reject_all(&AppError::network(
            format!("agent disconnected: {reason}"),
            None,
        ));

        let handlers: Vec<DisconnectHandler> = lock(&self.disconnect_handlers)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(reason);
        }
    }

    /// Dispatch one decoded line: classify and route the frame.
    async fn dispatch_line(&self, line: &str) {
        if line.trim().is_empty() {
            return;
        }

        let frame = match WireMessage::parse(line) {
            Ok(frame) => frame,
            Err(err) => {
                // Malformed frames are a local, recoverable condition.
                warn!(error = %err, raw_line = line, "skipping malformed frame");
                return;
            }
        };

        match frame {
            WireMessage::Response { id, result, error } => self.dispatch_response(id, result, error),
            WireMessage::Notification { method, params } => {
                self.dispatch_notification(&method, &params);
            }
            WireMessage::Request { id, method, params } => {
                self.dispatch_inbound_request(id, &method, params).await;
            }
        }
    }

    /// Route a response to its pending request. A response whose id has no
    /// matching entry is dropped: the request may have already timed out.
    fn dispatch_response(&self, id: u64, result: Option<Value>, error: Option<ResponseError>) {
        let Some(tx) = lock(&self.pending).remove(&id) else {
            debug!(request_id = id, "dropping response with no pending request");
            return;
        };

        let settled = match error {
            Some(err) => Err(AppError::Protocol(format!(
                "agent error {}: {}",
                err.code, err.message
            ))),
            None => Ok(result.unwrap_or(Value::Null)),
        };

        // The receiver may already be gone (caller timed out between our
        // removal and this send); that race settles in the caller's favor.
        let _ = tx.send(settled);
    }

    /// Fan a notification out to every handler registered for its method.
    /// Handlers run synchronously, before the next frame is processed.
    fn dispatch_notification(&self, method: &str, params: &Value) {
        let handlers: Vec<NotificationHandler> = lock(&self.subscriptions)
            .get(method)
            .map_or_else(Vec::new, |entries| {
                entries.iter().map(|(_, h)| Arc::clone(h)).collect()
            });

        if handlers.is_empty() {
            debug!(method, "notification has no subscribers");
            return;
        }

        for handler in handlers {
            handler(params);
        }
    }

    /// Answer an inbound agent→client request on the same id.
    async fn dispatch_inbound_request(&self, id: u64, method: &str, params: Value) {
        let response = if method == "session/request_permission" {
            let handler = lock(&self.permission_handler).clone();
            let decision = match handler {
                Some(handler) => {
                    let request = PermissionRequest {
                        session_id: params
                            .get("sessionId")
                            .and_then(Value::as_str)
                            .map(str::to_owned),
                        params,
                    };
                    handler(request)
                }
                // Fail closed when no policy is installed.
                None => PermissionDecision {
                    approved: false,
                    reason: Some("no permission handler configured".into()),
                },
            };

            WireMessage::Response {
                id,
                result: Some(json!({
                    "approved": decision.approved,
                    "reason": decision.reason,
                })),
                error: None,
            }
        } else {
            debug!(method, request_id = id, "unsupported inbound request method");
            WireMessage::Response {
                id,
                result: None,
                error: Some(ResponseError {
                    code: -32601,
                    message: format!("method not found: {method}"),
                    data: None,
                }),
            }
        };

        match response.to_line() {
            Ok(line) => {
                if self.outbound.send(line).await.is_err() {
                    debug!(request_id = id, "writer closed before response could be sent");
                }
            }
            Err(err) => warn!(%err, "failed to encode inbound-request response"),
        }
    }
}

// ── Public client ────────────────────────────────────────────────────────────

/// Transport client for one agent subprocess.
///
/// Cheaply cloneable; all clones share the same stream, pending-request
/// table, and subscription lists.
#[derive(Debug, Clone)]
pub struct AcpClient {
    inner: Arc<ClientInner>,
}

impl AcpClient {
    /// Build a client over an arbitrary read/write pair and start the
    /// reader and writer tasks.
    ///
    /// Production code connects over a child process's pipes via
    /// [`AcpClient::spawn`]; tests connect over in-memory duplex streams.
    #[must_use]
    pub fn connect<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CHANNEL_DEPTH);
        let cancel = CancellationToken::new();

        let inner = Arc::new(ClientInner {
            next_id: AtomicU64::new(1),
            next_token: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            disconnect_handlers: Mutex::new(Vec::new()),
            permission_handler: Mutex::new(None),
            outbound: outbound_tx,
            cancel: cancel.clone(),
        });

        tokio::spawn(run_writer(writer, outbound_rx, cancel.clone()));
        tokio::spawn(run_reader(Arc::clone(&inner), reader));

        Self { inner }
    }

    /// Spawn the agent subprocess and connect over its stdio pipes.
    ///
    /// The returned [`Child`] must be kept alive for the duration of the
    /// run; pass it to [`crate::acp::spawner::shutdown_child`] on teardown.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Agent`] (spawn kind) when the process cannot be
    /// started or its pipes captured.
    pub fn spawn(config: &SpawnConfig) -> Result<(Self, Child)> {
        let conn = spawn_agent(config)?;
        let client = Self::connect(conn.stdout, conn.stdin);
        Ok((client, conn.child))
    }

    /// Send a request and await its response.
    ///
    /// Allocates a fresh id, registers a pending entry, writes the framed
    /// request, and waits up to `timeout` for the matching response. On
    /// timeout the entry is removed so a late response for that id is
    /// silently dropped; no cancellation message is sent to the agent.
    ///
    /// # Errors
    ///
    /// - [`AppError::Agent`] (timeout kind) — no response within `timeout`.
    /// - [`AppError::Network`] — the stream closed before or while the
    ///   request was outstanding.
    /// - [`AppError::Protocol`] — the agent answered with an error object,
    ///   or the request could not be encoded.
    pub async fn send_request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        let line = WireMessage::Request {
            id,
            method: method.to_owned(),
            params,
        }
        .to_line()?;

        lock(&self.inner.pending).insert(id, tx);
        debug!(method, request_id = id, "sending request");

        if self.inner.outbound.send(line).await.is_err() {
            lock(&self.inner.pending).remove(&id);
            return Err(AppError::network(
                format!("agent stream closed before `{method}` could be written"),
                None,
            ));
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(settled)) => settled,
            // The sender was dropped without settling: client shutdown.
            Ok(Err(_)) => Err(AppError::network(
                format!("`{method}` abandoned during client shutdown"),
                None,
            )),
            Err(_elapsed) => {
                lock(&self.inner.pending).remove(&id);
                Err(AppError::agent_timeout(
                    format!("no response to `{method}` within {timeout:?}"),
                    None,
                    None,
                ))
            }
        }
    }

    /// Perform the `initialize` handshake.
    ///
    /// Must complete before any session work is issued.
    ///
    /// # Errors
    ///
    /// Propagates [`AcpClient::send_request`] failures.
    pub async fn initialize(&self, timeout: Duration) -> Result<Value> {
        self.send_request(
            "initialize",
            json!({
                "protocolVersion": 1,
                "clientInfo": {
                    "name": "agent-conductor",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
            timeout,
        )
        .await
    }

    /// Register `handler` for every notification matching `method`.
    ///
    /// Multiple handlers for the same method all fire, independently, in
    /// registration order. The returned [`Subscription`] removes exactly
    /// this registration when dropped.
    #[must_use]
    pub fn on_notification(
        &self,
        method: &str,
        handler: impl Fn(&Value) + Send + Sync + 'static,
    ) -> Subscription {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.subscriptions)
            .entry(method.to_owned())
            .or_default()
            .push((token, Arc::new(handler)));

        Subscription {
            inner: Arc::downgrade(&self.inner),
            key: SubscriptionKey::Notification(method.to_owned()),
            token,
        }
    }

    /// Register `handler` to be invoked once when the stream disconnects.
    #[must_use]
    pub fn on_disconnect(
        &self,
        handler: impl Fn(&str) + Send + Sync + 'static,
    ) -> Subscription {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
        lock(&self.inner.disconnect_handlers).push((token, Arc::new(handler)));

        Subscription {
            inner: Arc::downgrade(&self.inner),
            key: SubscriptionKey::Disconnect,
            token,
        }
    }

    /// Install the responder for inbound `session/request_permission`
    /// requests. Without one, permission requests are denied with a reason.
    pub fn set_permission_handler(
        &self,
        handler: impl Fn(PermissionRequest) -> PermissionDecision + Send + Sync + 'static,
    ) {
        *lock(&self.inner.permission_handler) = Some(Arc::new(handler));
    }

    /// Number of requests currently awaiting a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        lock(&self.inner.pending).len()
    }

    /// Stop the reader and writer tasks and abandon outstanding requests.
    ///
    /// Callers still awaiting a response observe a network error; disconnect
    /// handlers are not fired for an explicit local shutdown.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner
            .reject_all(&AppError::network("client shut down", None));
    }
}

// ── Reader / writer tasks ────────────────────────────────────────────────────

/// Writer task: drains encoded frames and writes each as one NDJSON line.
async fn run_writer<W>(
    mut writer: W,
    mut outbound_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("acp writer: cancellation received, stopping");
                break;
            }

            frame = outbound_rx.recv() => {
                match frame {
                    None => {
                        debug!("acp writer: frame channel closed, stopping");
                        break;
                    }
                    Some(line) => {
                        let mut bytes = line.into_bytes();
                        bytes.push(b'\n');
                        if let Err(err) = writer.write_all(&bytes).await {
                            warn!(%err, "acp writer: write failed, stopping");
                            break;
                        }
                    }
                }
            }
        }
    }
}

/// Reader task: decodes NDJSON lines and dispatches each frame.
///
/// Malformed lines and over-long lines are logged and skipped; EOF and I/O
/// errors end the task after rejecting all outstanding requests.
async fn run_reader<R>(inner: Arc<ClientInner>, reader: R)
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(reader, AcpCodec::new());
    let cancel = inner.cancel.clone();

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("acp reader: cancellation received, stopping");
                break;
            }

            item = framed.next() => {
                match item {
                    None => {
                        inner.handle_disconnect("stream closed");
                        break;
                    }
                    Some(Err(AppError::Protocol(ref msg))) => {
                        // Codec-level error (line too long) — skip the line.
                        warn!(error = msg.as_str(), "acp reader: framing error, skipping");
                    }
                    Some(Err(err)) => {
                        inner.handle_disconnect(&format!("stream error: {err}"));
                        break;
                    }
                    Some(Ok(line)) => {
                        inner.dispatch_line(&line).await;
                    }
                }
            }
        }
    }
}

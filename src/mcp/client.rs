//! Transport-agnostic async JSON-RPC 2.0 client
//!
//! This module provides [`JsonRpcClient`], the correlation engine shared by
//! every transport. Callers wire up two [`tokio::sync::mpsc`] channels (one
//! for outbound serialized messages, one for inbound serialized messages) and
//! then call [`start_read_loop`] to process responses and notifications
//! concurrently. [`connect`] does both for a [`Transport`].
//!
//! # Design
//!
//! - Outbound messages are written to `outbound_tx` as newline-free JSON
//!   strings. A single writer task drains that channel, so writes to the
//!   underlying transport are never interleaved.
//! - Inbound messages arrive on `inbound_rx` as JSON strings. The read loop
//!   classifies each message as a response, a server-initiated request, or a
//!   notification and dispatches accordingly.
//! - In-flight requests are tracked in a `pending` map keyed by `u64` request
//!   ID. An entry leaves the map on whichever of reply, timeout, write
//!   failure, or cancellation happens first, so a request completes once.
//! - Cancelling the [`CancellationToken`] drops all pending senders so
//!   awaiting callers fail promptly. An inbound stream that simply ends (peer
//!   exit, dropped connection) leaves pending requests to their timeouts.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;

use crate::error::{McpHostError, Result};
use crate::mcp::transport::Transport;
use crate::mcp::types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, METHOD_PING};

/// Default timeout applied to every request when the caller does not specify one.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A notification handler: called with the raw `params` value when a matching
/// server notification arrives.
type NotificationHandler = Box<dyn Fn(serde_json::Value) + Send + Sync + 'static>;

/// How a pending request was completed.
#[derive(Debug)]
enum Reply {
    Result(serde_json::Value),
    Error(JsonRpcError),
    WriteFailed(String),
}

/// The pending-response map type: maps request ID to the oneshot sender.
type PendingMap = HashMap<u64, oneshot::Sender<Reply>>;

/// Transport-agnostic async JSON-RPC 2.0 client.
///
/// One client belongs to exactly one server session: it owns that session's
/// id counter and pending table, and nothing in it is shared across servers.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use mcp_host::mcp::client::{JsonRpcClient, start_read_loop};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
///     let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
///     let token = CancellationToken::new();
///     let client = Arc::new(JsonRpcClient::new("echo", out_tx));
///     let _handle = start_read_loop(in_rx, token, Arc::clone(&client));
///     Ok(())
/// }
/// ```
pub struct JsonRpcClient {
    /// Name of the server this client talks to; used in errors and logs.
    server: String,
    /// Monotonically increasing request ID counter.
    next_id: AtomicU64,
    /// In-flight requests waiting for a response.
    pending: Mutex<PendingMap>,
    /// Channel used to send serialized JSON-RPC messages to the transport.
    outbound_tx: mpsc::UnboundedSender<String>,
    /// Registered handlers for server-sent notifications (method -> handler).
    notification_handlers: std::sync::Mutex<HashMap<String, NotificationHandler>>,
    /// Timeout used when `request` is called without an explicit one.
    default_timeout: Duration,
}

impl std::fmt::Debug for JsonRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonRpcClient")
            .field("server", &self.server)
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl JsonRpcClient {
    /// Create a new `JsonRpcClient` for the named server.
    ///
    /// The caller is responsible for:
    /// 1. Wiring the receiver of `outbound_tx` to a transport writer.
    /// 2. Calling [`start_read_loop`] with the corresponding inbound receiver.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use mcp_host::mcp::client::JsonRpcClient;
    ///
    /// let (tx, _rx) = mpsc::unbounded_channel::<String>();
    /// let client = JsonRpcClient::new("echo", tx);
    /// assert_eq!(client.server_name(), "echo");
    /// ```
    pub fn new(server: impl Into<String>, outbound_tx: mpsc::UnboundedSender<String>) -> Self {
        Self {
            server: server.into(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            outbound_tx,
            notification_handlers: std::sync::Mutex::new(HashMap::new()),
            default_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Override the timeout applied when `request` receives `None`.
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Name of the server this client is bound to.
    pub fn server_name(&self) -> &str {
        &self.server
    }

    /// Number of requests currently awaiting a reply.
    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Send a JSON-RPC request and await the typed response.
    ///
    /// Assigns the next monotonic ID, serializes the request, sends it on the
    /// outbound channel, and waits for the matching response.
    ///
    /// # Arguments
    ///
    /// * `method` - The JSON-RPC method name.
    /// * `params` - Parameters to serialize into the `params` field.
    /// * `timeout` - Optional timeout; defaults to the client's default.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Transport`] if the outbound channel is closed,
    /// the write failed, or the session was stopped while waiting.
    /// Returns [`McpHostError::Timeout`] if no response arrives in time.
    /// Returns [`McpHostError::Rpc`] if the server returns an error object.
    /// Returns [`McpHostError::Serialization`] if (de)serialization fails.
    pub async fn request<P, R>(
        &self,
        method: &str,
        params: P,
        timeout: Option<Duration>,
    ) -> Result<R>
    where
        P: serde::Serialize + Send,
        R: serde::de::DeserializeOwned,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        // Register the pending slot before sending so the response can never
        // arrive before we are ready to receive it.
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let message = serde_json::to_string(&JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: Some(serde_json::json!(id)),
            method: method.to_string(),
            params: Some(serde_json::to_value(params)?),
        })?;

        tracing::trace!(server = %self.server, id, method, "sending request");

        if self.outbound_tx.send(message).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(McpHostError::Transport("outbound channel closed".to_string()).into());
        }

        let deadline = timeout.unwrap_or(self.default_timeout);
        let outcome = match tokio::time::timeout(deadline, rx).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.lock().await.remove(&id);
                tracing::debug!(server = %self.server, id, method, "request timed out");
                return Err(McpHostError::Timeout {
                    server: self.server.clone(),
                    method: method.to_string(),
                }
                .into());
            }
        };

        // The sender was dropped: the session was stopped before a reply.
        let reply = outcome.map_err(|_| {
            McpHostError::Transport(format!(
                "session with server `{}` closed before `{method}` completed",
                self.server
            ))
        })?;

        let value = match reply {
            Reply::Result(value) => value,
            Reply::Error(e) => {
                return Err(McpHostError::Rpc {
                    code: e.code,
                    message: e.message,
                }
                .into())
            }
            Reply::WriteFailed(reason) => return Err(McpHostError::Transport(reason).into()),
        };

        serde_json::from_value(value).map_err(|e| McpHostError::Serialization(e).into())
    }

    /// Send a JSON-RPC notification (no response expected).
    ///
    /// Notifications have no `id` field and the server MUST NOT reply.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Transport`] if the outbound channel is closed.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use tokio::sync::mpsc;
    /// use mcp_host::mcp::client::JsonRpcClient;
    ///
    /// #[tokio::main]
    /// async fn main() -> anyhow::Result<()> {
    ///     let (tx, _rx) = mpsc::unbounded_channel::<String>();
    ///     let client = JsonRpcClient::new("echo", tx);
    ///     client.notify("notifications/initialized", serde_json::json!({}))?;
    ///     Ok(())
    /// }
    /// ```
    pub fn notify<P: serde::Serialize + Send>(&self, method: &str, params: P) -> Result<()> {
        let message = serde_json::to_string(&serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": serde_json::to_value(params)?
        }))?;

        self.outbound_tx
            .send(message)
            .map_err(|_| McpHostError::Transport("outbound channel closed".to_string()))?;

        Ok(())
    }

    /// Register a handler for a server-sent notification.
    ///
    /// Registering a second handler for the same method replaces the first.
    /// Handlers run on the read loop and must not block; spawn for real work.
    ///
    /// # Examples
    ///
    /// ```
    /// use tokio::sync::mpsc;
    /// use mcp_host::mcp::client::JsonRpcClient;
    /// use mcp_host::mcp::types::NOTIF_TOOLS_LIST_CHANGED;
    ///
    /// let (tx, _rx) = mpsc::unbounded_channel::<String>();
    /// let client = JsonRpcClient::new("echo", tx);
    /// client.on_notification(NOTIF_TOOLS_LIST_CHANGED, |_params| {
    ///     // refresh tool list
    /// });
    /// ```
    pub fn on_notification(
        &self,
        method: impl Into<String>,
        f: impl Fn(serde_json::Value) + Send + Sync + 'static,
    ) {
        if let Ok(mut handlers) = self.notification_handlers.lock() {
            handlers.insert(method.into(), Box::new(f));
        }
    }

    /// Fail the pending request whose serialized envelope could not be written.
    async fn reject_unwritten(&self, message: &str, reason: String) {
        let Some(id) = serde_json::from_str::<serde_json::Value>(message)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_u64()))
        else {
            return;
        };
        if let Some(tx) = self.pending.lock().await.remove(&id) {
            let _ = tx.send(Reply::WriteFailed(reason));
        }
    }
}

/// Bridge a [`Transport`] to a fresh [`JsonRpcClient`].
///
/// Spawns a writer task (outbound channel -> `transport.send`), a reader task
/// (`transport.receive` -> inbound channel) and the read loop. All three stop
/// when `cancellation` fires.
pub fn connect(
    server: &str,
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
    cancellation: CancellationToken,
) -> Arc<JsonRpcClient> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
    let client = Arc::new(JsonRpcClient::new(server, out_tx).with_default_timeout(default_timeout));

    let writer_transport = Arc::clone(&transport);
    let writer_client = Arc::downgrade(&client);
    let writer_token = cancellation.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = writer_token.cancelled() => break,
                maybe_msg = out_rx.recv() => {
                    let Some(message) = maybe_msg else { break };
                    if let Err(e) = writer_transport.send(message.clone()).await {
                        let Some(client) = writer_client.upgrade() else { break };
                        tracing::warn!(server = %client.server, "transport write failed: {e:#}");
                        client.reject_unwritten(&message, format!("{e:#}")).await;
                    }
                }
            }
        }
    });

    let reader_token = cancellation.clone();
    tokio::spawn(async move {
        let mut stream = transport.receive();
        loop {
            tokio::select! {
                biased;
                _ = reader_token.cancelled() => break,
                maybe_msg = stream.next() => {
                    let Some(raw) = maybe_msg else { break };
                    if in_tx.send(raw).is_err() {
                        break;
                    }
                }
            }
        }
    });

    start_read_loop(in_rx, cancellation, Arc::clone(&client));
    client
}

/// Start the JSON-RPC read loop as a background Tokio task.
///
/// The loop reads serialized JSON strings from `inbound_rx`, classifies each
/// message, and dispatches it:
///
/// - **Response** (has `"id"` and `"result"` or `"error"`): resolves the
///   matching pending [`oneshot`] sender. Replies for unknown ids are
///   dropped.
/// - **Server-initiated request** (has `"id"` and `"method"`): `ping` is
///   answered with an empty result; anything else gets JSON-RPC
///   `-32601 Method not found`.
/// - **Notification** (has `"method"` but no `"id"`): calls the registered
///   handler, if any.
///
/// On cancellation, all pending senders are dropped so that in-flight
/// `request()` calls fail promptly. When the inbound channel closes the
/// loop exits and leaves pending requests to time out.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio::sync::mpsc;
/// use tokio_util::sync::CancellationToken;
/// use mcp_host::mcp::client::{start_read_loop, JsonRpcClient};
///
/// #[tokio::main]
/// async fn main() {
///     let (out_tx, _out_rx) = mpsc::unbounded_channel::<String>();
///     let (_in_tx, in_rx) = mpsc::unbounded_channel::<String>();
///     let token = CancellationToken::new();
///     let client = Arc::new(JsonRpcClient::new("echo", out_tx));
///     let handle = start_read_loop(in_rx, token.clone(), Arc::clone(&client));
///     token.cancel();
///     handle.await.unwrap();
/// }
/// ```
pub fn start_read_loop(
    mut inbound_rx: mpsc::UnboundedReceiver<String>,
    cancellation: CancellationToken,
    client: Arc<JsonRpcClient>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => {
                    client.pending.lock().await.clear();
                    break;
                }

                maybe_msg = inbound_rx.recv() => {
                    let Some(raw) = maybe_msg else {
                        tracing::debug!(server = %client.server, "inbound stream ended");
                        break;
                    };
                    dispatch_message(&raw, &client).await;
                }
            }
        }
    })
}

/// Classify and dispatch a single inbound JSON string.
async fn dispatch_message(raw: &str, client: &Arc<JsonRpcClient>) {
    let value: serde_json::Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(server = %client.server, "discarding non-JSON message: {e}");
            return;
        }
    };

    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let has_method = value.get("method").is_some();
    let has_result = value.get("result").is_some();
    let has_error = value.get("error").is_some();

    if has_id && (has_result || has_error) && !has_method {
        handle_response(value, client).await;
    } else if has_id && has_method {
        handle_server_request(value, client);
    } else if has_method {
        handle_notification(value, client);
    } else {
        tracing::debug!(
            server = %client.server,
            "ignoring unclassifiable message: has_id={has_id} has_result={has_result} has_error={has_error}"
        );
    }
}

/// Resolve a pending request sender with the response value or error.
async fn handle_response(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let id_val = &value["id"];
    let id = match id_val
        .as_u64()
        .or_else(|| id_val.as_str().and_then(|s| s.parse::<u64>().ok()))
    {
        Some(id) => id,
        None => {
            tracing::warn!(server = %client.server, "response has non-integer id: {id_val}");
            return;
        }
    };

    let Some(tx) = client.pending.lock().await.remove(&id) else {
        tracing::debug!(server = %client.server, id, "dropping response for unknown id");
        return;
    };

    let reply = match value.get("error") {
        Some(error_val) => Reply::Error(
            serde_json::from_value::<JsonRpcError>(error_val.clone()).unwrap_or_else(|_| {
                JsonRpcError {
                    code: -32603,
                    message: format!("malformed error object: {error_val}"),
                    data: None,
                }
            }),
        ),
        None => Reply::Result(value.get("result").cloned().unwrap_or_default()),
    };

    // The caller may have already timed out.
    let _ = tx.send(reply);
}

/// Answer a server-initiated request.
fn handle_server_request(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let method = value
        .get("method")
        .and_then(|m| m.as_str())
        .unwrap_or_default();
    let id = value.get("id").cloned();

    let (result, error) = if method == METHOD_PING {
        (Some(serde_json::json!({})), None)
    } else {
        tracing::debug!(server = %client.server, method, "rejecting unsupported server request");
        (
            None,
            Some(JsonRpcError {
                code: -32601,
                message: format!("Method not found: {method}"),
                data: None,
            }),
        )
    };

    let response = JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result,
        error,
    };

    if let Ok(serialized) = serde_json::to_string(&response) {
        let _ = client.outbound_tx.send(serialized);
    }
}

/// Call the registered notification handler.
fn handle_notification(value: serde_json::Value, client: &Arc<JsonRpcClient>) {
    let Some(method) = value.get("method").and_then(|m| m.as_str()) else {
        return;
    };
    let params = value
        .get("params")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    let Ok(handlers) = client.notification_handlers.lock() else {
        return;
    };
    match handlers.get(method) {
        Some(handler) => handler(params),
        None => tracing::debug!(server = %client.server, method, "no handler for notification"),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Event-stream transport for remote MCP servers
//!
//! This module implements [`SseTransport`]. The exchange is asymmetric:
//!
//! 1. A long-lived GET with `Accept: text/event-stream` is opened to the
//!    configured URL.
//! 2. The first `endpoint` event carries a path or absolute URL. Resolved
//!    against the configured URL, it becomes the **session endpoint** for
//!    the life of the transport.
//! 3. Every outbound JSON-RPC message is POSTed to the session endpoint. The
//!    POST's own response body is not the reply; replies arrive later as
//!    `message` events on the push connection.
//!
//! Configured headers are sent with the GET and with every POST.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{McpHostError, Result};
use crate::mcp::transport::{Transport, TransportStatus};

/// Event name announcing the session endpoint.
const EVENT_ENDPOINT: &str = "endpoint";
/// Event name carrying a JSON-RPC message.
const EVENT_MESSAGE: &str = "message";

/// One dispatched server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// The `event:` field; `"message"` when absent.
    pub event: String,
    /// All `data:` lines joined with `\n`.
    pub data: String,
}

/// Event-stream MCP transport.
///
/// # Examples
///
/// ```no_run
/// use std::collections::BTreeMap;
/// use std::time::Duration;
/// use mcp_host::mcp::transport::sse::SseTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = SseTransport::connect(
///     "remote",
///     "http://localhost:3000/sse",
///     &BTreeMap::new(),
///     Duration::from_secs(30),
/// )
/// .await?;
/// println!("posting to {}", transport.session_endpoint());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct SseTransport {
    /// Server name, for logs and errors.
    server: String,
    /// Where outbound messages are POSTed.
    endpoint: Url,
    /// Shared HTTP client for the push connection and the POSTs.
    http_client: reqwest::Client,
    /// Extra headers added to every POST.
    headers: BTreeMap<String, String>,
    /// Shared receiver of `message` event payloads, exposed via `receive()`.
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Liveness; flipped to `Disconnected` by the reader task.
    status_tx: Arc<watch::Sender<TransportStatus>>,
    /// Stops the reader task.
    cancel: CancellationToken,
}

impl SseTransport {
    /// Open the push connection and wait for the `endpoint` event.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::HandshakeTimeout`] when no endpoint arrives
    /// within `endpoint_timeout`, [`McpHostError::Handshake`] when the stream
    /// ends first or the endpoint cannot be resolved, and
    /// [`McpHostError::Transport`] when the GET is refused.
    pub async fn connect(
        server: &str,
        url: &str,
        headers: &BTreeMap<String, String>,
        endpoint_timeout: Duration,
    ) -> Result<Self> {
        let base = Url::parse(url)?;
        let http_client = reqwest::Client::builder().build()?;
        let cancel = CancellationToken::new();

        let handshake = open_stream(server, &http_client, &base, headers, cancel.clone());
        let outcome = tokio::time::timeout(endpoint_timeout, handshake).await;

        let (endpoint, inbound_rx, status_tx) = match outcome {
            Ok(Ok(parts)) => parts,
            Ok(Err(e)) => {
                cancel.cancel();
                return Err(e);
            }
            Err(_) => {
                cancel.cancel();
                return Err(McpHostError::HandshakeTimeout {
                    server: server.to_string(),
                    seconds: endpoint_timeout.as_secs(),
                }
                .into());
            }
        };

        tracing::debug!(server, endpoint = %endpoint, "event stream session established");

        Ok(Self {
            server: server.to_string(),
            endpoint,
            http_client,
            headers: headers.clone(),
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            status_tx,
            cancel,
        })
    }

    /// The resolved session endpoint.
    pub fn session_endpoint(&self) -> &Url {
        &self.endpoint
    }
}

type StreamParts = (
    Url,
    mpsc::UnboundedReceiver<String>,
    Arc<watch::Sender<TransportStatus>>,
);

async fn open_stream(
    server: &str,
    http_client: &reqwest::Client,
    base: &Url,
    headers: &BTreeMap<String, String>,
    cancel: CancellationToken,
) -> Result<StreamParts> {
    let mut req = http_client
        .get(base.as_str())
        .header("Accept", "text/event-stream");
    for (k, v) in headers {
        req = req.header(k.as_str(), v.as_str());
    }

    let response = req.send().await.map_err(|e| {
        McpHostError::Transport(format!("event stream request to {base} failed: {e}"))
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(
            McpHostError::Transport(format!("event stream {base} returned HTTP {status}")).into(),
        );
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SseEvent>();
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
    let (endpoint_tx, endpoint_rx) = oneshot::channel::<std::result::Result<Url, String>>();
    let (status_tx, _) = watch::channel(TransportStatus::Running);
    let status_tx = Arc::new(status_tx);

    // Reader: bytes -> events. Publishes the drop unless the owner closed us.
    let reader_status = Arc::clone(&status_tx);
    let reader_server = server.to_string();
    let byte_stream = response.bytes_stream();
    tokio::spawn(async move {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return,
            outcome = parse_sse_stream(byte_stream, events_tx) => outcome,
        };
        if cancel.is_cancelled() {
            return;
        }
        let reason = match outcome {
            Ok(()) => "event stream ended".to_string(),
            Err(e) => format!("event stream failed: {e}"),
        };
        tracing::debug!(server = %reader_server, "{reason}");
        reader_status.send_replace(TransportStatus::Disconnected(reason));
    });

    // Dispatcher: the first `endpoint` event resolves the session, `message`
    // events become inbound JSON-RPC strings.
    let dispatch_server = server.to_string();
    let dispatch_base = base.clone();
    tokio::spawn(async move {
        let mut endpoint_tx = Some(endpoint_tx);
        while let Some(event) = events_rx.recv().await {
            match event.event.as_str() {
                EVENT_ENDPOINT => match endpoint_tx.take() {
                    Some(tx) => {
                        let resolved = resolve_endpoint(&dispatch_base, &event.data)
                            .map_err(|e| format!("{e:#}"));
                        let _ = tx.send(resolved);
                    }
                    None => tracing::debug!(
                        server = %dispatch_server,
                        "ignoring repeated endpoint event"
                    ),
                },
                EVENT_MESSAGE => {
                    if inbound_tx.send(event.data).is_err() {
                        break;
                    }
                }
                other => {
                    tracing::debug!(server = %dispatch_server, event = other, "ignoring event")
                }
            }
        }
    });

    let endpoint = match endpoint_rx.await {
        Ok(Ok(endpoint)) => endpoint,
        Ok(Err(reason)) => {
            return Err(McpHostError::Handshake {
                server: server.to_string(),
                reason: format!("invalid endpoint event: {reason}"),
            }
            .into())
        }
        Err(_) => {
            return Err(McpHostError::Handshake {
                server: server.to_string(),
                reason: "event stream closed before the endpoint event".to_string(),
            }
            .into())
        }
    };

    Ok((endpoint, inbound_rx, status_tx))
}

/// Resolve an `endpoint` event payload against the push-connection URL.
///
/// Absolute URLs are returned unchanged; paths are joined to `base`.
///
/// # Examples
///
/// ```
/// use url::Url;
/// use mcp_host::mcp::transport::sse::resolve_endpoint;
///
/// let base = Url::parse("http://localhost:3000/sse").unwrap();
/// let endpoint = resolve_endpoint(&base, "/session/abc").unwrap();
/// assert_eq!(endpoint.as_str(), "http://localhost:3000/session/abc");
/// ```
pub fn resolve_endpoint(base: &Url, payload: &str) -> Result<Url> {
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(McpHostError::Transport("empty endpoint event".to_string()).into());
    }
    Ok(base.join(payload)?)
}

/// Parse a server-sent-event byte stream.
///
/// Events are separated by blank lines. `data:` lines are joined with `\n`;
/// `event:` names the event (default `message`); `id:`, `retry:` and comment
/// lines are ignored. Events with no data and `ping` events are dropped.
///
/// Returns `Ok(())` when the stream ends cleanly and `Err` with the stream's
/// error message otherwise.
pub async fn parse_sse_stream<E: std::fmt::Display>(
    byte_stream: impl Stream<Item = std::result::Result<Bytes, E>>,
    events_tx: mpsc::UnboundedSender<SseEvent>,
) -> std::result::Result<(), String> {
    // Raw bytes between `\n\n` boundaries, with `\r` removed so CRLF framing
    // parses the same as LF.
    let mut buffer: Vec<u8> = Vec::new();

    tokio::pin!(byte_stream);

    while let Some(chunk_result) = byte_stream.next().await {
        let chunk = chunk_result.map_err(|e| e.to_string())?;
        buffer.extend(chunk.iter().filter(|b| **b != b'\r'));

        while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = buffer.drain(..pos + 2).collect();
            let text = String::from_utf8_lossy(&block[..pos]);
            if let Some(event) = parse_event_block(&text) {
                if events_tx.send(event).is_err() {
                    return Ok(());
                }
            }
        }
    }

    if !buffer.is_empty() {
        if let Some(event) = parse_event_block(&String::from_utf8_lossy(&buffer)) {
            let _ = events_tx.send(event);
        }
    }

    Ok(())
}

/// Parse a single event block (the text between two blank lines).
fn parse_event_block(block: &str) -> Option<SseEvent> {
    let mut data_lines: Vec<&str> = Vec::new();
    let mut event_type: Option<&str> = None;

    for line in block.lines() {
        if let Some(value) = line.strip_prefix("data:") {
            data_lines.push(value.strip_prefix(' ').unwrap_or(value));
        } else if let Some(value) = line.strip_prefix("event:") {
            event_type = Some(value.trim());
        }
    }

    let event = event_type.unwrap_or(EVENT_MESSAGE);
    if event.eq_ignore_ascii_case("ping") || data_lines.is_empty() {
        return None;
    }

    Some(SseEvent {
        event: event.to_string(),
        data: data_lines.join("\n"),
    })
}

#[async_trait::async_trait]
impl Transport for SseTransport {
    /// POST the message to the session endpoint.
    ///
    /// The response body is ignored; the reply arrives on the push
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Transport`] when the transport is closed, the
    /// POST fails, or the endpoint answers with a non-success status.
    async fn send(&self, message: String) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(McpHostError::Transport(format!(
                "event stream for server `{}` is closed",
                self.server
            ))
            .into());
        }

        let mut req = self
            .http_client
            .post(self.endpoint.as_str())
            .header("Content-Type", "application/json")
            .body(message);
        for (k, v) in &self.headers {
            req = req.header(k.as_str(), v.as_str());
        }

        let response = req
            .send()
            .await
            .map_err(|e| McpHostError::Transport(format!("POST to {} failed: {e}", self.endpoint)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(McpHostError::Transport(format!(
                "POST to {} returned HTTP {status}",
                self.endpoint
            ))
            .into());
        }

        Ok(())
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    /// Always empty: a remote server has no diagnostic side channel.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    fn status(&self) -> watch::Receiver<TransportStatus> {
        self.status_tx.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        self.status_tx.send_replace(TransportStatus::Closed);
        Ok(())
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

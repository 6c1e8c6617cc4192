//! In-process fake transport for unit tests
//!
//! [`FakeTransport`] implements [`Transport`] over in-memory channels so the
//! client, the handshake routine and server instances can be exercised
//! without spawning processes or opening sockets.
//!
//! ```text
//! client send() -----> outbound_tx -----> outbound_rx (handle reads)
//! client receive() <-- inbound_rx  <----- inbound_tx  (handle writes)
//! ```
//!
//! The handle can also simulate the peer going away with
//! [`FakeTransportHandle::set_status`].

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::{mpsc, watch, Mutex};

use crate::error::{McpHostError, Result};
use crate::mcp::transport::{Transport, TransportStatus};

/// In-process fake transport for use in tests.
#[derive(Debug)]
pub struct FakeTransport {
    /// What the client writes goes here; the handle drains it.
    outbound_tx: mpsc::UnboundedSender<String>,
    /// Populated by the handle's `inbound_tx`; exposed via `receive()`.
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Shared with the handle so tests can flip liveness.
    status_tx: Arc<watch::Sender<TransportStatus>>,
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();
        let (status_tx, _) = watch::channel(TransportStatus::Running);
        let status_tx = Arc::new(status_tx);

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            status_tx: Arc::clone(&status_tx),
        };

        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
            status_tx,
        };

        (transport, handle)
    }
}

/// The test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Receives messages that the client sent via [`Transport::send`].
    pub outbound_rx: mpsc::UnboundedReceiver<String>,
    /// Sends server messages into the client's [`Transport::receive`] stream.
    pub inbound_tx: mpsc::UnboundedSender<String>,
    status_tx: Arc<watch::Sender<TransportStatus>>,
}

impl FakeTransportHandle {
    /// Push a JSON value into the client's inbound stream.
    pub fn inject(&self, message: serde_json::Value) {
        let _ = self.inbound_tx.send(message.to_string());
    }

    /// Wait for the next outbound message and parse it.
    pub async fn next_sent(&mut self) -> Option<serde_json::Value> {
        let raw = self.outbound_rx.recv().await?;
        serde_json::from_str(&raw).ok()
    }

    /// Simulate a liveness change (peer exit, dropped connection).
    pub fn set_status(&self, status: TransportStatus) {
        self.status_tx.send_replace(status);
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, message: String) -> Result<()> {
        if self.status_tx.borrow().is_terminal() {
            return Err(McpHostError::Transport("fake transport is closed".into()).into());
        }
        self.outbound_tx.send(message).map_err(|e| {
            McpHostError::Transport(format!("fake transport outbound channel closed: {e}")).into()
        })
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

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        Box::pin(futures::stream::empty())
    }

    fn status(&self) -> watch::Receiver<TransportStatus> {
        self.status_tx.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.status_tx.send_replace(TransportStatus::Closed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;

    #[tokio::test]
    async fn test_send_delivers_to_handle() {
        let (transport, mut handle) = FakeTransport::new();

        transport
            .send(r#"{"jsonrpc":"2.0","method":"ping"}"#.to_string())
            .await
            .unwrap();

        let sent = tokio::time::timeout(Duration::from_secs(2), handle.next_sent())
            .await
            .expect("timed out")
            .expect("channel closed");
        assert_eq!(sent["method"], "ping");
    }

    #[tokio::test]
    async fn test_receive_yields_injected_message() {
        let (transport, handle) = FakeTransport::new();
        handle.inject(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": "ok"}));

        let mut stream = transport.receive();
        let received = tokio::time::timeout(Duration::from_secs(2), stream.next())
            .await
            .expect("timed out")
            .expect("stream ended");
        let v: serde_json::Value = serde_json::from_str(&received).unwrap();
        assert_eq!(v["result"], "ok");
    }

    #[tokio::test]
    async fn test_close_is_observed_and_blocks_send() {
        let (transport, _handle) = FakeTransport::new();
        let status = transport.status();
        transport.close().await.unwrap();
        assert_eq!(*status.borrow(), TransportStatus::Closed);
        assert!(transport.send("{}".into()).await.is_err());
    }
}

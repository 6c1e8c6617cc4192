//! MCP transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait that both wire variants
//! satisfy. Concrete implementations live in submodules:
//!
//! - [`stdio::StdioTransport`] -- spawns a child process and communicates
//!   over its stdin/stdout pipes (newline-delimited JSON).
//! - [`sse::SseTransport`] -- holds a server-push connection open and POSTs
//!   requests to the session endpoint announced by the first `endpoint`
//!   event.
//! - [`fake::FakeTransport`] -- in-process fake used in tests (cfg(test)
//!   only).
//!
//! # Design
//!
//! Callers `send` a serialized JSON-RPC string and `receive` a stream of
//! serialized JSON-RPC strings (one per logical message). Framing and
//! session management are the responsibility of each implementation.
//! Liveness is published through a [`watch`] channel so the owner of a
//! session can react to a child exiting or a connection dropping.
//!
//! The `receive_err` stream carries transport-level diagnostics (e.g. stderr
//! output from a child process). Diagnostic output is never an error.

use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use tokio::sync::watch;

use crate::error::Result;
use crate::mcp::config::{McpSettings, ServerConfig, TransportConfig};

pub mod sse;
pub mod stdio;

#[cfg(test)]
pub mod fake;

/// Liveness of a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportStatus {
    /// The peer is reachable.
    Running,
    /// The child process exited on its own. `code` is `None` for a signal.
    Exited {
        /// Exit code, when the process exited normally.
        code: Option<i32>,
    },
    /// The push connection ended or failed.
    Disconnected(String),
    /// The owner closed the transport.
    Closed,
}

impl TransportStatus {
    /// `true` once the transport can no longer carry messages.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransportStatus::Running)
    }
}

/// Abstraction over MCP transport implementations.
///
/// The handshake routine and server instances depend only on this trait.
///
/// # Examples
///
/// ```no_run
/// use mcp_host::mcp::transport::Transport;
///
/// // Implementations are created via their own constructors (or
/// // `transport::open`) and used through `Arc<dyn Transport>`.
/// ```
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Send a complete JSON-RPC message string to the remote peer.
    ///
    /// The transport adds any framing the medium needs (a newline for stdio,
    /// an HTTP POST for the event-stream variant).
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::McpHostError::Transport`] if the underlying
    /// I/O operation fails.
    async fn send(&self, message: String) -> Result<()>;

    /// Returns a stream of inbound JSON-RPC message strings.
    ///
    /// The stream ends when the transport is closed or the peer goes away.
    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Returns a stream of transport-level diagnostic strings.
    ///
    /// For stdio transports this carries lines written to the child's
    /// stderr. Other transports return an empty stream.
    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>>;

    /// Subscribe to liveness changes.
    fn status(&self) -> watch::Receiver<TransportStatus>;

    /// Process id of the peer, for transports that own a child process.
    fn process_id(&self) -> Option<u32> {
        None
    }

    /// Shut the transport down. Safe to call more than once.
    async fn close(&self) -> Result<()>;
}

/// Open the transport selected by the config's discriminator.
///
/// Returns once the transport is ready to carry messages: the child has been
/// spawned, or the session endpoint has been announced.
///
/// # Errors
///
/// Returns [`crate::error::McpHostError::Spawn`] when a stdio child cannot be
/// launched and [`crate::error::McpHostError::HandshakeTimeout`] when an
/// event-stream endpoint never arrives.
pub async fn open(config: &ServerConfig, settings: &McpSettings) -> Result<Arc<dyn Transport>> {
    match &config.transport {
        TransportConfig::Stdio {
            command,
            args,
            env,
            cwd,
        } => {
            let transport = stdio::StdioTransport::spawn(
                &config.name,
                command,
                args,
                env,
                cwd.as_deref(),
                settings.shutdown_timeout(),
            )?;
            Ok(Arc::new(transport))
        }
        TransportConfig::Sse { url, headers } => {
            let transport =
                sse::SseTransport::connect(&config.name, url, headers, settings.endpoint_timeout())
                    .await?;
            Ok(Arc::new(transport))
        }
    }
}

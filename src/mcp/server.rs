//! Server instance: one transport, one negotiated session, one status record
//!
//! An [`McpServer`] is single-use. [`McpServer::start`] opens the transport,
//! runs the handshake and discovery, publishes a `running` snapshot and then
//! watches the transport until it ends. Restarting a server means building a
//! new instance; no wire state is carried over.
//!
//! Status transitions are published while the instance holds its session
//! slot, so a concurrent [`McpServer::stop`] can never be overtaken by a late
//! `running` snapshot.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};

use chrono::Utc;
use futures::StreamExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::{McpHostError, Result};
use crate::mcp::client;
use crate::mcp::config::{McpSettings, ServerConfig};
use crate::mcp::protocol::{Discovery, InitializedMcpProtocol, McpProtocol};
use crate::mcp::status::{ServerState, ServerStatus, StatusBus};
use crate::mcp::transport::{self, Transport, TransportStatus};
use crate::mcp::types::{
    CallToolResponse, Implementation, ResourceContents, NOTIF_MESSAGE, NOTIF_TOOLS_LIST_CHANGED,
};

/// Stderr lines kept for startup diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// A live, negotiated connection.
#[derive(Debug)]
struct Session {
    protocol: InitializedMcpProtocol,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
}

/// One capability server and its lifecycle.
pub struct McpServer {
    config: ServerConfig,
    settings: McpSettings,
    bus: StatusBus,
    status: RwLock<ServerStatus>,
    session: RwLock<Option<Arc<Session>>>,
    stderr_tail: Arc<Mutex<VecDeque<String>>>,
    /// Fired by `stop`; every session token is a child of it.
    shutdown: CancellationToken,
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.config.name)
            .field("state", &self.status().state)
            .finish_non_exhaustive()
    }
}

impl McpServer {
    /// Create a stopped instance that publishes on `bus`.
    pub fn new(config: ServerConfig, settings: McpSettings, bus: StatusBus) -> Arc<Self> {
        let status = ServerStatus::stopped(&config);
        Arc::new(Self {
            config,
            settings,
            bus,
            status: RwLock::new(status),
            session: RwLock::new(None),
            stderr_tail: Arc::new(Mutex::new(VecDeque::new())),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The latest published snapshot.
    pub fn status(&self) -> ServerStatus {
        self.status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_running(&self) -> bool {
        self.status().is_running()
    }

    /// Open the transport, negotiate and discover.
    ///
    /// Publishes `starting`, then `running` on success or `error` on failure.
    ///
    /// # Errors
    ///
    /// - [`McpHostError::Spawn`] when a stdio child cannot be launched.
    /// - [`McpHostError::HandshakeTimeout`] when the endpoint or the
    ///   `initialize` reply never arrives.
    /// - [`McpHostError::Handshake`] for every other handshake failure,
    ///   including a peer that exits first and a `stop` issued mid-start.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(self.stopped_during_start());
        }

        self.publish(ServerStatus::new(&self.config, ServerState::Starting));
        tracing::info!(server = %self.config.name, transport = self.config.transport.kind(), "starting server");

        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => Err(self.stopped_during_start()),
            opened = transport::open(&self.config, &self.settings) => match opened {
                Ok(transport) => self.run_session(transport).await,
                Err(e) => Err(e),
            },
        };

        if let Err(e) = &outcome {
            tracing::warn!(server = %self.config.name, "failed to start: {e:#}");
            if !self.shutdown.is_cancelled() {
                self.publish(ServerStatus::failed(&self.config, format!("{e:#}")));
            }
        }
        outcome
    }

    /// Drive an already-open transport through handshake and discovery.
    pub(crate) async fn run_session(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Result<()> {
        self.capture_stderr(&transport);

        let cancel = self.shutdown.child_token();
        let client = client::connect(
            &self.config.name,
            Arc::clone(&transport),
            self.settings.request_timeout(),
            cancel.clone(),
        );
        self.watch_notifications(&client);

        let handshake = async {
            let protocol = McpProtocol::new(Arc::clone(&client))
                .initialize(self.client_info(), self.settings.handshake_grace())
                .await?;
            let window = self.settings.discovery_timeout();
            let discovery = match tokio::time::timeout(window, protocol.discover()).await {
                Ok(discovery) => discovery,
                Err(_) => {
                    tracing::warn!(
                        server = %self.config.name,
                        seconds = window.as_secs(),
                        "discovery did not finish in time; starting with empty catalogs"
                    );
                    Discovery::default()
                }
            };
            Ok::<_, anyhow::Error>((protocol, discovery))
        };

        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(self.stopped_during_start()),
            ended = wait_terminal(transport.status()) => Err(McpHostError::Handshake {
                server: self.config.name.clone(),
                reason: self.with_stderr(format!(
                    "server {} before the handshake completed",
                    describe_exit(&ended)
                )),
            }
            .into()),
            negotiated = handshake => negotiated.map_err(|e| self.handshake_error(e)),
        };

        let (protocol, discovery) = match outcome {
            Ok(negotiated) => negotiated,
            Err(e) => {
                cancel.cancel();
                if let Err(close_err) = transport.close().await {
                    tracing::debug!(server = %self.config.name, "close after failed start: {close_err:#}");
                }
                return Err(e);
            }
        };

        let session = Arc::new(Session {
            protocol,
            transport: Arc::clone(&transport),
            cancel,
        });

        if !self.install_session(&session, discovery) {
            session.cancel.cancel();
            let _ = transport.close().await;
            return Err(self.stopped_during_start());
        }

        tokio::spawn(monitor(
            Arc::downgrade(self),
            Arc::clone(&session),
            transport.status(),
        ));
        Ok(())
    }

    /// Store the session and publish `running`, unless `stop` got there first.
    fn install_session(&self, session: &Arc<Session>, discovery: Discovery) -> bool {
        let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
        if self.shutdown.is_cancelled() {
            return false;
        }
        *slot = Some(Arc::clone(session));

        let protocol = &session.protocol;
        let status = ServerStatus {
            pid: session.transport.process_id(),
            tools: discovery.tools,
            resources: discovery.resources,
            prompts: discovery.prompts,
            server_info: protocol.server_info().cloned(),
            capabilities: Some(protocol.capabilities().clone()),
            ..ServerStatus::new(&self.config, ServerState::Running)
        };
        tracing::info!(
            server = %self.config.name,
            pid = ?status.pid,
            tools = status.tools.len(),
            "server running"
        );
        self.publish(status);
        true
    }

    /// Stop the server and publish `stopped`.
    ///
    /// In-flight requests are rejected. Stopping an instance that never
    /// started, or is already stopped, only marks it as finished.
    pub async fn stop(&self) {
        self.shutdown.cancel();

        let session = {
            let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
            let session = slot.take();
            if session.is_some() || self.status().state != ServerState::Stopped {
                self.publish(ServerStatus::stopped(&self.config));
            }
            session
        };

        if let Some(session) = session {
            if let Err(e) = session.transport.close().await {
                tracing::warn!(server = %self.config.name, "error closing transport: {e:#}");
            }
            tracing::info!(server = %self.config.name, "server stopped");
        }
    }

    /// Invoke a tool on the running server.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::NotRunning`] without a live session, otherwise
    /// whatever the request itself fails with.
    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: Option<serde_json::Value>,
    ) -> Result<CallToolResponse> {
        let session = self.require_session()?;
        tracing::debug!(server = %self.config.name, tool, "calling tool");
        session.protocol.call_tool(tool, arguments).await
    }

    /// Read a resource from the running server.
    pub async fn get_resource(&self, uri: &str) -> Result<Vec<ResourceContents>> {
        let session = self.require_session()?;
        session.protocol.read_resource(uri).await
    }

    /// Round-trip a `ping`.
    pub async fn ping(&self) -> Result<()> {
        self.require_session()?.protocol.ping().await
    }

    /// Re-list tools and publish a fresh `running` snapshot.
    pub async fn refresh_tools(&self) -> Result<()> {
        let session = self.require_session()?;
        let tools = session.protocol.list_tools().await?;

        let slot = self.session.read().unwrap_or_else(PoisonError::into_inner);
        if !matches!(slot.as_ref(), Some(current) if Arc::ptr_eq(current, &session)) {
            return Ok(());
        }
        let mut next = self.status();
        tracing::info!(
            server = %self.config.name,
            before = next.tools.len(),
            after = tools.len(),
            "tool list changed"
        );
        next.tools = tools;
        next.since = Utc::now();
        self.publish(next);
        Ok(())
    }

    fn require_session(&self) -> Result<Arc<Session>> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| McpHostError::NotRunning(self.config.name.clone()).into())
    }

    /// Record a snapshot and hand it to the bus.
    ///
    /// Entering `running` stores first; leaving it notifies first. Listeners
    /// therefore never act on tools of a server whose stored status is not
    /// `running`.
    fn publish(&self, status: ServerStatus) {
        let mut current = self.status.write().unwrap_or_else(PoisonError::into_inner);
        if status.is_running() {
            *current = status.clone();
            self.bus.publish(&status);
        } else {
            self.bus.publish(&status);
            *current = status;
        }
    }

    /// Called by the monitor when the transport ended on its own.
    async fn on_transport_ended(&self, session: &Arc<Session>, ended: TransportStatus) {
        {
            let mut slot = self.session.write().unwrap_or_else(PoisonError::into_inner);
            if !matches!(slot.as_ref(), Some(current) if Arc::ptr_eq(current, session)) {
                return;
            }
            *slot = None;

            let next = match &ended {
                TransportStatus::Exited { code: Some(0) } | TransportStatus::Closed => {
                    tracing::info!(server = %self.config.name, "server {}", describe_exit(&ended));
                    ServerStatus::stopped(&self.config)
                }
                other => {
                    let message = self.with_stderr(format!("server {}", describe_exit(other)));
                    tracing::warn!(server = %self.config.name, "{message}");
                    ServerStatus::failed(&self.config, message)
                }
            };
            self.publish(next);
        }

        // Pending requests are left to their timeouts; only the wire is released.
        if let Err(e) = session.transport.close().await {
            tracing::debug!(server = %self.config.name, "close after exit: {e:#}");
        }
    }

    fn watch_notifications(self: &Arc<Self>, client: &client::JsonRpcClient) {
        let weak = Arc::downgrade(self);
        client.on_notification(NOTIF_TOOLS_LIST_CHANGED, move |_| {
            let Some(server) = weak.upgrade() else { return };
            tokio::spawn(async move {
                if let Err(e) = server.refresh_tools().await {
                    tracing::warn!(server = %server.config.name, "tool refresh failed: {e:#}");
                }
            });
        });

        let name = self.config.name.clone();
        client.on_notification(NOTIF_MESSAGE, move |params| {
            tracing::debug!(server = %name, "server log: {params}");
        });
    }

    fn capture_stderr(&self, transport: &Arc<dyn Transport>) {
        let tail = Arc::clone(&self.stderr_tail);
        tail.lock().unwrap_or_else(PoisonError::into_inner).clear();

        let transport = Arc::clone(transport);
        tokio::spawn(async move {
            let mut lines = transport.receive_err();
            while let Some(line) = lines.next().await {
                let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
                if tail.len() == STDERR_TAIL_LINES {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        });
    }

    fn with_stderr(&self, message: String) -> String {
        let tail = self.stderr_tail.lock().unwrap_or_else(PoisonError::into_inner);
        if tail.is_empty() {
            return message;
        }
        let lines: Vec<&str> = tail.iter().map(String::as_str).collect();
        format!("{message}; stderr:\n{}", lines.join("\n"))
    }

    fn handshake_error(&self, error: anyhow::Error) -> anyhow::Error {
        match error.downcast_ref::<McpHostError>() {
            Some(McpHostError::Timeout { .. }) => McpHostError::HandshakeTimeout {
                server: self.config.name.clone(),
                seconds: self.settings.request_timeout_seconds,
            }
            .into(),
            _ if self.shutdown.is_cancelled() => self.stopped_during_start(),
            _ => McpHostError::Handshake {
                server: self.config.name.clone(),
                reason: self.with_stderr(format!("{error:#}")),
            }
            .into(),
        }
    }

    fn stopped_during_start(&self) -> anyhow::Error {
        McpHostError::Handshake {
            server: self.config.name.clone(),
            reason: "server was stopped during start".to_string(),
        }
        .into()
    }

    fn client_info(&self) -> Implementation {
        Implementation {
            name: self.settings.client_name.clone(),
            version: self.settings.client_version.clone(),
        }
    }
}

/// Watch one session's transport until it ends or the session is cancelled.
async fn monitor(
    server: Weak<McpServer>,
    session: Arc<Session>,
    status_rx: watch::Receiver<TransportStatus>,
) {
    let cancel = session.cancel.clone();
    let ended = tokio::select! {
        _ = cancel.cancelled() => return,
        ended = wait_terminal(status_rx) => ended,
    };
    if let Some(server) = server.upgrade() {
        server.on_transport_ended(&session, ended).await;
    }
}

/// Resolve with the first terminal status; never resolves if the sender goes away.
async fn wait_terminal(mut rx: watch::Receiver<TransportStatus>) -> TransportStatus {
    let ended = rx
        .wait_for(TransportStatus::is_terminal)
        .await
        .map(|status| status.clone());
    match ended {
        Ok(status) => status,
        Err(_) => futures::future::pending().await,
    }
}

fn describe_exit(status: &TransportStatus) -> String {
    match status {
        TransportStatus::Exited { code: Some(code) } => format!("exited with status {code}"),
        TransportStatus::Exited { code: None } => "was terminated by a signal".to_string(),
        TransportStatus::Disconnected(reason) => format!("disconnected: {reason}"),
        TransportStatus::Closed => "was closed".to_string(),
        TransportStatus::Running => "is running".to_string(),
    }
}

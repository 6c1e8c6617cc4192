//! Stdio transport for MCP child-process servers
//!
//! This module implements [`StdioTransport`], which spawns a child process
//! and communicates with it over its stdin/stdout pipes using
//! newline-delimited JSON framing.
//!
//! # Protocol
//!
//! - Outbound messages are written to the child's stdin as a single JSON
//!   object followed by a newline (`\n`).
//! - Inbound bytes are buffered and split on newlines. Lines that are not
//!   JSON (banners, log output some servers print to stdout) are discarded
//!   at `DEBUG` level.
//! - The child's stderr is forwarded to a diagnostic stream and logged via
//!   `tracing::debug!`. It is never treated as an error condition.
//!
//! # Lifecycle
//!
//! The transport is created via [`StdioTransport::spawn`]. Four background
//! Tokio tasks are started immediately: a stdin writer, a stdout reader, a
//! stderr reader, and a waiter that owns the [`Child`] and publishes its
//! exit through [`Transport::status`]. [`Transport::close`] closes stdin,
//! waits for the child to exit and kills it if it does not. Dropping the
//! transport kills the child.

use std::collections::BTreeMap;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, watch, Mutex};

use crate::error::{McpHostError, Result};
use crate::mcp::transport::{Transport, TransportStatus};

/// Stdio-based MCP transport that drives a child process.
///
/// # Examples
///
/// ```no_run
/// use std::collections::BTreeMap;
/// use std::time::Duration;
/// use mcp_host::mcp::transport::stdio::StdioTransport;
///
/// # #[tokio::main]
/// # async fn main() -> anyhow::Result<()> {
/// let transport = StdioTransport::spawn(
///     "filesystem",
///     "npx",
///     &["-y".into(), "@modelcontextprotocol/server-filesystem".into(), "/tmp".into()],
///     &BTreeMap::new(),
///     None,
///     Duration::from_secs(5),
/// )?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StdioTransport {
    /// Server name, for logs and errors.
    server: String,
    /// Child pid captured at spawn time.
    pid: Option<u32>,
    /// Sender side of the stdin channel; `None` once stdin has been closed.
    stdin_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<String>>>,
    /// Shared receiver for stdout lines (one JSON message per line).
    stdout_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Shared receiver for stderr lines (diagnostics only).
    stderr_rx: Arc<Mutex<mpsc::UnboundedReceiver<String>>>,
    /// Liveness published by the waiter task.
    status_rx: watch::Receiver<TransportStatus>,
    /// Set once the owner asked for shutdown; turns the exit into `Closed`.
    closing: Arc<AtomicBool>,
    /// Asks the waiter task to kill the child.
    kill_tx: std::sync::Mutex<Option<oneshot::Sender<()>>>,
    /// Grace period between closing stdin and killing the child.
    shutdown_timeout: Duration,
}

impl StdioTransport {
    /// Spawn a child process and wire up stdio pipes.
    ///
    /// `env` is applied on top of the host's own environment so inherited
    /// variables such as `PATH` survive. If `cwd` is `Some`, the child's
    /// working directory is set accordingly.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Spawn`] if the process cannot be launched or
    /// its pipes are unavailable.
    pub fn spawn(
        server: &str,
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
        cwd: Option<&Path>,
        shutdown_timeout: Duration,
    ) -> Result<Self> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        let spawn_error = |reason: String| McpHostError::Spawn {
            server: server.to_string(),
            reason,
        };

        let mut child = cmd
            .spawn()
            .map_err(|e| spawn_error(format!("{command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_error("child stdin unavailable after spawn".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_error("child stdout unavailable after spawn".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| spawn_error("child stderr unavailable after spawn".into()))?;

        let pid = child.id();
        tracing::debug!(server, command, pid, "spawned server process");

        let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<String>();
        let (stdout_tx, stdout_rx) = mpsc::unbounded_channel::<String>();
        let (stderr_tx, stderr_rx) = mpsc::unbounded_channel::<String>();
        let (status_tx, status_rx) = watch::channel(TransportStatus::Running);
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let closing = Arc::new(AtomicBool::new(false));

        // Background task: forward stdin_rx -> child stdin. Dropping the last
        // sender ends the loop and closes the pipe.
        let name = server.to_string();
        tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = stdin_rx.recv().await {
                let line = format!("{msg}\n");
                if let Err(e) = stdin.write_all(line.as_bytes()).await {
                    tracing::debug!(server = %name, "stdin write failed: {e}");
                    break;
                }
                if stdin.flush().await.is_err() {
                    break;
                }
            }
        });

        // Background task: drain child stdout -> stdout_tx.
        let name = server.to_string();
        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(server = %name, "stdout read failed: {e}");
                        break;
                    }
                }
                let text = String::from_utf8_lossy(&buf);
                let line = text.trim();
                if line.is_empty() {
                    continue;
                }
                if serde_json::from_str::<serde::de::IgnoredAny>(line).is_err() {
                    tracing::debug!(server = %name, "discarding non-JSON stdout line: {line}");
                    continue;
                }
                if stdout_tx.send(line.to_string()).is_err() {
                    break;
                }
            }
        });

        // Background task: drain child stderr -> stderr_tx + tracing log.
        let name = server.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(server = %name, "server stderr: {line}");
                if stderr_tx.send(line).is_err() {
                    break;
                }
            }
        });

        // Background task: own the child and publish how it ended.
        tokio::spawn(wait_for_exit(
            server.to_string(),
            child,
            kill_rx,
            status_tx,
            Arc::clone(&closing),
        ));

        Ok(Self {
            server: server.to_string(),
            pid,
            stdin_tx: std::sync::Mutex::new(Some(stdin_tx)),
            stdout_rx: Arc::new(Mutex::new(stdout_rx)),
            stderr_rx: Arc::new(Mutex::new(stderr_rx)),
            status_rx,
            closing,
            kill_tx: std::sync::Mutex::new(Some(kill_tx)),
            shutdown_timeout,
        })
    }

    fn request_kill(&self) {
        if let Ok(mut guard) = self.kill_tx.lock() {
            if let Some(tx) = guard.take() {
                let _ = tx.send(());
            }
        }
    }

    async fn wait_terminal(&self, within: Duration) -> bool {
        let mut rx = self.status_rx.clone();
        tokio::time::timeout(within, rx.wait_for(TransportStatus::is_terminal))
            .await
            .is_ok_and(|r| r.is_ok())
    }
}

async fn wait_for_exit(
    server: String,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    status_tx: watch::Sender<TransportStatus>,
    closing: Arc<AtomicBool>,
) {
    let exit = tokio::select! {
        exit = child.wait() => exit,
        _ = kill_rx => {
            if let Err(e) = child.start_kill() {
                tracing::debug!(server = %server, "kill failed: {e}");
            }
            child.wait().await
        }
    };

    let status = if closing.load(Ordering::SeqCst) {
        TransportStatus::Closed
    } else {
        match exit {
            Ok(status) => TransportStatus::Exited {
                code: status.code(),
            },
            Err(e) => {
                tracing::warn!(server = %server, "failed to wait for server process: {e}");
                TransportStatus::Exited { code: None }
            }
        }
    };

    tracing::debug!(server = %server, ?status, "server process ended");
    status_tx.send_replace(status);
}

#[async_trait::async_trait]
impl Transport for StdioTransport {
    /// Enqueue a message for the stdin writer task.
    ///
    /// # Errors
    ///
    /// Returns [`McpHostError::Transport`] once stdin has been closed.
    async fn send(&self, message: String) -> Result<()> {
        let sent = self
            .stdin_tx
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(|tx| tx.send(message).is_ok()));
        match sent {
            Some(true) => Ok(()),
            _ => Err(McpHostError::Transport(format!(
                "stdin of server `{}` is closed",
                self.server
            ))
            .into()),
        }
    }

    fn receive(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stdout_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn receive_err(&self) -> Pin<Box<dyn Stream<Item = String> + Send + '_>> {
        let rx = Arc::clone(&self.stderr_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    fn status(&self) -> watch::Receiver<TransportStatus> {
        self.status_rx.clone()
    }

    fn process_id(&self) -> Option<u32> {
        self.pid
    }

    /// Close stdin, give the child `shutdown_timeout` to exit, then kill it.
    async fn close(&self) -> Result<()> {
        self.closing.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.stdin_tx.lock() {
            guard.take();
        }

        if self.wait_terminal(self.shutdown_timeout).await {
            return Ok(());
        }

        tracing::debug!(server = %self.server, "server did not exit after stdin closed; killing");
        self.request_kill();
        self.wait_terminal(self.shutdown_timeout).await;
        Ok(())
    }
}

impl Drop for StdioTransport {
    fn drop(&mut self) {
        self.request_kill();
    }
}

//! Error types for mcp-host
//!
//! This module defines the error taxonomy shared by the transports, the
//! server lifecycle manager and the integration layer, using `thiserror`
//! for ergonomic error handling.

use thiserror::Error;

/// Main error type for mcp-host operations
///
/// Fatal start-up failures (`Spawn`, `HandshakeTimeout`, `Handshake`) are
/// returned from `start` calls. Per-request failures (`Rpc`, `Timeout`) are
/// surfaced only to the caller that issued the request.
#[derive(Error, Debug)]
pub enum McpHostError {
    /// Configuration-related errors (invalid settings, malformed server entries)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The server executable could not be launched
    #[error("Failed to spawn server `{server}`: {reason}")]
    Spawn {
        /// Name of the server that failed to launch
        server: String,
        /// Underlying reason reported by the OS
        reason: String,
    },

    /// The event-stream endpoint or the initialize reply did not arrive in time
    #[error("Handshake with server `{server}` timed out after {seconds}s")]
    HandshakeTimeout {
        /// Name of the server being started
        server: String,
        /// Length of the window that elapsed
        seconds: u64,
    },

    /// Generic handshake failure (peer error, exit, malformed reply)
    #[error("Handshake with server `{server}` failed: {reason}")]
    Handshake {
        /// Name of the server being started
        server: String,
        /// Description of the failure
        reason: String,
    },

    /// The peer answered a request with a JSON-RPC error object
    #[error("RPC error {code}: {message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message supplied by the peer
        message: String,
    },

    /// No correlated reply arrived within the request window
    #[error("Request `{method}` to server `{server}` timed out")]
    Timeout {
        /// Name of the server the request was sent to
        server: String,
        /// JSON-RPC method of the request
        method: String,
    },

    /// The caller tried to start a server that is already running
    #[error("Server `{0}` is already running")]
    AlreadyRunning(String),

    /// An operation referenced an unknown server name
    #[error("Server `{0}` not found")]
    NotFound(String),

    /// The server exists but has no live session
    #[error("Server `{0}` is not running")]
    NotRunning(String),

    /// Transport-level I/O failures (closed pipes, failed POSTs)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Catalog lookup or requirement validation failures
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

/// Result type alias for mcp-host operations
///
/// Uses `anyhow::Error` so context can be attached while the typed
/// [`McpHostError`] stays recoverable through `downcast_ref`.
pub type Result<T> = anyhow::Result<T>;

//! MCP (Model Context Protocol) client support
//!
//! This module connects to external capability servers over stdio or an
//! HTTP event stream, performs the initialize handshake, discovers tools,
//! resources and prompts, and supervises each server's lifecycle.
//!
//! The implementation targets protocol revision **2024-11-05**.
//!
//! # Module Layout
//!
//! - `types`     -- Protocol types and JSON-RPC primitives
//! - `client`    -- Transport-agnostic async JSON-RPC 2.0 client
//! - `protocol`  -- Typed lifecycle wrapper over `JsonRpcClient`
//! - `transport` -- `Transport` trait with stdio and event-stream implementations
//! - `config`    -- Server configs, the config document, protocol settings
//! - `status`    -- Server status snapshots and the status bus
//! - `server`    -- One supervised server instance
//! - `manager`   -- All configs and instances

pub mod client;
pub mod config;
pub mod manager;
pub mod protocol;
pub mod server;
pub mod status;
pub mod transport;
pub mod types;

pub use types::*;

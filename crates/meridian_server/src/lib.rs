//! # Meridian Server - Network Layer
//!
//! WebSocket transport for the Meridian runtime. This crate accepts sockets,
//! upgrades them, and hands each one to a link driver from `meridian_core`;
//! everything above the transport (handshake, dispatch, replication) lives in
//! the core crate.
//!
//! ## Architecture Overview
//!
//! * **[`MeridianServer`]** - master host plus the accept loop
//! * **[`MeridianClient`]** - slave host linked to one upstream server
//! * **[`ConnectionManager`]** - socket bookkeeping and connection limits
//! * **[`SystemService`]** - built-in `System.Ping` / `System.Pong`
//!
//! ### Message Flow
//!
//! 1. A client opens a WebSocket and sends the `Syn` control frame
//! 2. The server answers `SynAck` and the client confirms with `Ack`
//! 3. Each text message afterwards is one RPC frame, queued to the host
//! 4. The host dispatches frames on its next tick
//!
//! ## Error Handling
//!
//! The server uses structured error types ([`ServerError`]) to categorize failures:
//!
//! * **Network errors** - binding, upgrade and upstream connection issues
//! * **Internal errors** - errors surfaced by the host and its services

pub use client::{connect_upstream, MeridianClient};
pub use config::ServerConfig;
pub use connection::ConnectionManager;
pub use error::ServerError;
pub use server::MeridianServer;
pub use system::{PongReceivedEvent, SystemService};

pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod server;
pub mod system;

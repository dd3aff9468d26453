//! Socket-level connection tracking and the WebSocket transport.
//!
//! Peer identity and roles live in the host; this layer only knows about
//! sockets, their addresses and how many of them are open.

pub mod manager;
pub mod websocket;

pub use manager::{ClientConnection, ConnectionManager};
pub use websocket::{split_socket, WsSink, WsSource};

/// Type alias for connection identifiers.
///
/// Connection IDs identify accepted sockets from accept to close. They are
/// unrelated to the [`PeerId`](meridian_core::PeerId) exchanged in the link
/// handshake.
pub type ConnectionId = usize;

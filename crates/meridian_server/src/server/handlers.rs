//! Per-socket connection handling.

use crate::connection::{split_socket, ConnectionId, ConnectionManager};
use crate::error::ServerError;
use meridian_core::{drive_connection, CloseReason, HostSender, LinkOptions};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::accept_async;
use tracing::debug;

/// Handles one accepted socket from WebSocket upgrade to close.
///
/// # Connection Flow
///
/// 1. Perform the WebSocket upgrade within `upgrade_timeout`
/// 2. Run the link handshake as acceptor and pump frames to the host
/// 3. Deregister the socket from the connection manager
///
/// The connection must already be registered under `connection_id`; it is
/// removed on every exit path.
///
/// # Returns
///
/// The reason the link ended, or a `ServerError` if the upgrade failed.
pub async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    connection_id: ConnectionId,
    connection_manager: Arc<ConnectionManager>,
    host: HostSender,
    options: LinkOptions,
    upgrade_timeout: Duration,
) -> Result<CloseReason, ServerError> {
    let result = run_link(stream, addr, host, options, upgrade_timeout).await;
    connection_manager.remove_connection(connection_id).await;
    result
}

async fn run_link(
    stream: TcpStream,
    addr: SocketAddr,
    host: HostSender,
    options: LinkOptions,
    upgrade_timeout: Duration,
) -> Result<CloseReason, ServerError> {
    let socket = tokio::time::timeout(upgrade_timeout, accept_async(stream))
        .await
        .map_err(|_| ServerError::Network(format!("WebSocket upgrade from {addr} timed out")))?
        .map_err(|e| ServerError::Network(format!("WebSocket handshake failed: {e}")))?;

    let (sink, source) = split_socket(socket);
    let reason = drive_connection(sink, source, options, host).await;
    debug!("🔌 Socket {} finished: {:?}", addr, reason);
    Ok(reason)
}

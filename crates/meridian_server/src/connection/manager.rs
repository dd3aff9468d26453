//! Connection manager for tracking accepted sockets.

use super::ConnectionId;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// One accepted socket.
#[derive(Debug, Clone)]
pub struct ClientConnection {
    /// The remote network address of the client
    pub remote_addr: SocketAddr,

    /// When the socket was accepted
    pub connected_at: SystemTime,
}

impl ClientConnection {
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            remote_addr,
            connected_at: SystemTime::now(),
        }
    }
}

/// Central registry of open sockets.
///
/// Connection handlers register on accept and remove themselves when their
/// link ends. The manager enforces the configured connection limit.
///
/// # Architecture
///
/// * Uses `RwLock<HashMap>` for storage shared between accept loop and handlers
/// * Hands out connection IDs from an atomic counter
#[derive(Debug)]
pub struct ConnectionManager {
    connections: Arc<RwLock<HashMap<ConnectionId, ClientConnection>>>,
    next_id: AtomicUsize,
    max_connections: usize,
}

impl ConnectionManager {
    /// Creates a manager that admits at most `max_connections` sockets.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            next_id: AtomicUsize::new(1),
            max_connections,
        }
    }

    /// Registers a new socket and returns its ID.
    ///
    /// # Arguments
    ///
    /// * `remote_addr` - The network address of the connecting client
    ///
    /// # Returns
    ///
    /// The assigned `ConnectionId`, or `None` when the server is full.
    pub async fn add_connection(&self, remote_addr: SocketAddr) -> Option<ConnectionId> {
        let mut connections = self.connections.write().await;
        if connections.len() >= self.max_connections {
            warn!(
                "🚫 Refusing {}: {} connections already open",
                remote_addr,
                connections.len()
            );
            return None;
        }

        let connection_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        connections.insert(connection_id, ClientConnection::new(remote_addr));
        info!("🔗 Connection {} from {}", connection_id, remote_addr);
        Some(connection_id)
    }

    /// Removes a socket from the manager. Unknown IDs are ignored.
    pub async fn remove_connection(&self, connection_id: ConnectionId) {
        let mut connections = self.connections.write().await;
        if let Some(connection) = connections.remove(&connection_id) {
            info!(
                "❌ Connection {} from {} disconnected",
                connection_id, connection.remote_addr
            );
        }
    }

    pub async fn get_connection(&self, connection_id: ConnectionId) -> Option<ClientConnection> {
        self.connections.read().await.get(&connection_id).cloned()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

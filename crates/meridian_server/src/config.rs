//! Server configuration types and defaults.

use meridian_core::HostConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

/// Configuration structure for a Meridian server.
///
/// Network settings for the listener plus the [`HostConfig`] handed to the
/// authoritative host the server drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Seconds a new socket may take to finish the WebSocket upgrade
    pub connection_timeout: u64,

    /// Tick, handshake and replication settings for the host
    pub host: HostConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8080)),
            max_connections: 1000,
            connection_timeout: 60,
            host: HostConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout)
    }
}

//! Subordinate side: a slave host linked to one upstream server.

use crate::connection::split_socket;
use crate::error::ServerError;
use crate::system::SystemService;
use meridian_core::{
    drive_connection, CloseReason, EntityService, Host, HostConfig, HostSender, LinkOptions, Role,
    ShutdownState, SyncService,
};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tracing::{error, info};

/// Opens a WebSocket to `url` and starts the initiator side of the link
/// handshake for the host behind `sender`.
///
/// # Arguments
///
/// * `url` - `ws://` or `wss://` address of the upstream server
/// * `options` - Initiator options, usually [`Host::initiator_options`]
/// * `sender` - Inbound queue of the host the link belongs to
///
/// # Returns
///
/// The link driver task, which resolves to the reason the link ended.
pub async fn connect_upstream(
    url: &str,
    options: LinkOptions,
    sender: HostSender,
) -> Result<JoinHandle<CloseReason>, ServerError> {
    let (socket, _response) = connect_async(url)
        .await
        .map_err(|e| ServerError::Network(format!("Failed to connect to {url}: {e}")))?;
    info!("🌐 Connected to {}", url);

    let (sink, source) = split_socket(socket);
    Ok(tokio::spawn(drive_connection(sink, source, options, sender)))
}

/// A slave host with the built-in services attached, mirroring what an
/// upstream [`MeridianServer`](crate::MeridianServer) replicates.
pub struct MeridianClient {
    url: String,
    host: Host,
    entities: Arc<EntityService>,
    sync: Arc<SyncService>,
    system: Arc<SystemService>,
}

impl MeridianClient {
    pub fn new(url: impl Into<String>, config: HostConfig) -> Result<Self, ServerError> {
        let mut host = Host::new(Role::Slave, config.clone());
        let system = host.attach(SystemService::new())?;
        let entities = host.attach(EntityService::new(Role::Slave))?;
        let sync = host.attach(SyncService::from_config(&config))?;

        Ok(Self {
            url: url.into(),
            host,
            entities,
            sync,
            system,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Mutable access for attaching client services before running.
    pub fn host_mut(&mut self) -> &mut Host {
        &mut self.host
    }

    pub fn entities(&self) -> Arc<EntityService> {
        self.entities.clone()
    }

    pub fn sync(&self) -> Arc<SyncService> {
        self.sync.clone()
    }

    pub fn system(&self) -> Arc<SystemService> {
        self.system.clone()
    }

    /// Connects upstream and runs the host until the upstream link ends or
    /// `shutdown_state` is initiated.
    ///
    /// Losing the upstream stops the host. A handshake that never completes
    /// initiates `shutdown_state` and is reported as a network error.
    pub async fn run(&mut self, shutdown_state: ShutdownState) -> Result<(), ServerError> {
        let options = self.host.initiator_options();
        let driver = connect_upstream(&self.url, options, self.host.sender()).await?;

        let watcher = {
            let shutdown_state = shutdown_state.clone();
            tokio::spawn(async move {
                let reason = driver.await.unwrap_or(CloseReason::TransportLost);
                if matches!(
                    reason,
                    CloseReason::HandshakeFailed | CloseReason::HandshakeTimeout
                ) {
                    error!("❌ Upstream handshake did not complete: {:?}", reason);
                    shutdown_state.initiate_shutdown();
                }
                reason
            })
        };

        self.host.run(&shutdown_state).await?;

        if watcher.is_finished() {
            if let Ok(reason @ (CloseReason::HandshakeFailed | CloseReason::HandshakeTimeout)) =
                watcher.await
            {
                return Err(ServerError::Network(format!(
                    "Handshake with {} failed: {:?}",
                    self.url, reason
                )));
            }
        }

        info!("👋 Disconnected from {}", self.url);
        Ok(())
    }
}

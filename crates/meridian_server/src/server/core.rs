//! Core server implementation.
//!
//! `MeridianServer` owns the authoritative host and the WebSocket listener.
//! The accept loop runs as its own task and only talks to the host through
//! its [`HostSender`]; the host itself is ticked on the task that calls
//! [`MeridianServer::serve`].

use crate::{
    config::ServerConfig, connection::ConnectionManager, error::ServerError,
    server::handlers::handle_connection, system::SystemService,
};
use meridian_core::{
    EntityService, Host, HostSender, LinkOptions, Role, ShutdownState, SyncService,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// The authoritative side of a Meridian deployment.
///
/// # Architecture
///
/// * **Host**: master-role host with the built-in services attached
/// * **Connection Manager**: socket bookkeeping and the connection limit
/// * **Accept Loop**: upgrades sockets and spawns one link driver per socket
///
/// Game services are attached through [`host_mut`](Self::host_mut) before
/// the server starts.
pub struct MeridianServer {
    config: ServerConfig,
    host: Host,
    connection_manager: Arc<ConnectionManager>,
    entities: Arc<EntityService>,
    sync: Arc<SyncService>,
    system: Arc<SystemService>,
}

impl MeridianServer {
    /// Creates a server with the `System`, `EntityService` and `SyncService`
    /// services attached.
    ///
    /// # Arguments
    ///
    /// * `config` - Listener and host settings
    ///
    /// # Returns
    ///
    /// A server ready to be started, or a `ServerError` if a built-in
    /// service failed to register.
    pub fn new(config: ServerConfig) -> Result<Self, ServerError> {
        let mut host = Host::new(Role::Master, config.host.clone());
        let system = host.attach(SystemService::new())?;
        let entities = host.attach(EntityService::new(Role::Master))?;
        let sync = host.attach(SyncService::from_config(&config.host))?;
        let connection_manager = Arc::new(ConnectionManager::new(config.max_connections));

        Ok(Self {
            config,
            host,
            connection_manager,
            entities,
            sync,
            system,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Mutable access for attaching game services before the server starts.
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

    pub fn connection_manager(&self) -> Arc<ConnectionManager> {
        self.connection_manager.clone()
    }

    /// Binds the configured address.
    pub fn bind(
        &self,
    ) -> impl std::future::Future<Output = Result<TcpListener, ServerError>> + Send + 'static {
        let bind_address = self.config.bind_address;
        async move {
            TcpListener::bind(bind_address)
                .await
                .map_err(|e| {
                    ServerError::Network(format!("Failed to bind {}: {e}", bind_address))
                })
        }
    }

    /// Binds the configured address and serves until `shutdown_state` is
    /// initiated or the host stops.
    pub async fn start_with_shutdown_state(
        &mut self,
        shutdown_state: ShutdownState,
    ) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener, shutdown_state).await
    }

    /// Serves on an already bound listener.
    ///
    /// # Startup Sequence
    ///
    /// 1. Spawn the accept loop on `listener`
    /// 2. Run the host until shutdown is initiated or a fatal error occurs
    /// 3. Stop the accept loop; the host has already closed every link
    ///
    /// # Returns
    ///
    /// `Ok(())` if the host stopped cleanly, or the error that stopped it.
    pub async fn serve(
        &mut self,
        listener: TcpListener,
        shutdown_state: ShutdownState,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;
        info!("🚀 Starting Meridian server on {}", local_addr);
        info!("🆔 Host ID: {}", self.host.id());

        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.connection_manager.clone(),
            self.host.sender(),
            self.host.acceptor_options(),
            self.config.connection_timeout(),
            shutdown_state.clone(),
        ));

        let result = self.host.run(&shutdown_state).await;
        accept_task.abort();

        match result {
            Ok(()) => {
                info!("✅ Server on {} stopped", local_addr);
                Ok(())
            }
            Err(e) => {
                error!("❌ Host stopped with error: {}", e);
                Err(e.into())
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    connection_manager: Arc<ConnectionManager>,
    host: HostSender,
    options: LinkOptions,
    upgrade_timeout: Duration,
    shutdown_state: ShutdownState,
) {
    loop {
        tokio::select! {
            _ = shutdown_state.initiated() => {
                debug!("🛑 Accept loop stopping");
                break;
            }
            accepted = listener.accept() => {
                let (stream, addr) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        continue;
                    }
                };

                if host.is_closed() {
                    break;
                }

                let Some(connection_id) = connection_manager.add_connection(addr).await else {
                    continue;
                };

                let connection_manager = connection_manager.clone();
                let host = host.clone();
                let options = options.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(
                        stream,
                        addr,
                        connection_id,
                        connection_manager,
                        host,
                        options,
                        upgrade_timeout,
                    )
                    .await
                    {
                        warn!("⚠️ Connection {} from {} failed: {}", connection_id, addr, e);
                    }
                });
            }
        }
    }
}

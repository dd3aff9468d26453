//! Application lifecycle: configuration, startup, monitoring and shutdown.

use crate::{cli::CliArgs, config::AppConfig, logging::display_banner, signals::setup_signal_handlers};
use meridian_core::system::EventBusCounters;
use meridian_core::{EntityService, ShutdownState};
use meridian_server::{ConnectionManager, MeridianClient, MeridianServer, ServerError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const MONITOR_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(8);

/// What this process runs.
pub enum Mode {
    /// Authoritative host accepting WebSocket links
    Server(MeridianServer),
    /// Subordinate host linked to an upstream server
    Client(MeridianClient),
}

/// Main application struct.
///
/// Owns the merged configuration and the server or client it drives, and
/// coordinates monitoring and graceful shutdown around it.
pub struct Application {
    config: AppConfig,
    mode: Mode,
}

impl Application {
    /// Creates a new application instance.
    ///
    /// # Arguments
    ///
    /// * `args` - Parsed command-line arguments
    ///
    /// # Process
    ///
    /// 1. Load configuration from file (creating default if missing)
    /// 2. Apply command-line argument overrides
    /// 3. Validate merged configuration
    /// 4. Display startup banner
    /// 5. Build the server, or the client when an upstream URL is set
    pub async fn new(args: CliArgs) -> Result<Self, Box<dyn std::error::Error>> {
        info!("🔧 Loading configuration from: {}", args.config_path.display());
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        apply_overrides(&mut config, &args);

        if let Err(e) = config.validate() {
            return Err(format!("Configuration validation failed: {e}").into());
        }
        info!("✅ Configuration loaded and validated successfully");

        display_banner();

        let mode = match &config.client.upstream_url {
            Some(url) => Mode::Client(MeridianClient::new(url.clone(), config.to_host_config())?),
            None => Mode::Server(MeridianServer::new(config.to_server_config()?)?),
        };

        Ok(Self { config, mode })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runs until a termination signal arrives or the host stops on its own.
    ///
    /// # Returns
    ///
    /// `Ok(())` after a clean shutdown, or the error that stopped the host.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        self.log_configuration_summary();

        let shutdown_state = ShutdownState::new();
        let (monitor, mut host_task) = match self.mode {
            Mode::Server(mut server) => {
                let monitor = spawn_monitor(
                    server.host().bus_stats_handle(),
                    server.entities(),
                    Some(server.connection_manager()),
                );
                let state = shutdown_state.clone();
                info!("🎮 Ready to accept connections on {}", self.config.server.bind_address);
                let task = tokio::spawn(async move { server.start_with_shutdown_state(state).await });
                (monitor, task)
            }
            Mode::Client(mut client) => {
                let monitor = spawn_monitor(client.host().bus_stats_handle(), client.entities(), None);
                let state = shutdown_state.clone();
                info!("🛰️ Connecting upstream to {}", client.url());
                let task = tokio::spawn(async move { client.run(state).await });
                (monitor, task)
            }
        };
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let finished = tokio::select! {
            signal = setup_signal_handlers(&shutdown_state) => {
                signal?;
                info!("🛑 Shutdown signal received, stopping host...");
                monitor.abort();
                match tokio::time::timeout(SHUTDOWN_GRACE, &mut host_task).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        warn!("⏰ Host did not stop within {:?}, abandoning it", SHUTDOWN_GRACE);
                        host_task.abort();
                        Ok(Ok(()))
                    }
                }
            }
            joined = &mut host_task => {
                monitor.abort();
                joined
            }
        };

        shutdown_state.complete_shutdown();
        let result: Result<(), ServerError> = finished.unwrap_or_else(|e| {
            Err(ServerError::Internal(format!("host task failed: {e}")))
        });
        match result {
            Ok(()) => {
                info!("✅ Meridian shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("❌ Host stopped with error: {}", e);
                Err(e.into())
            }
        }
    }

    fn log_configuration_summary(&self) {
        info!("📋 Configuration Summary:");
        match &self.mode {
            Mode::Server(_) => {
                info!("  🌐 Bind address: {}", self.config.server.bind_address);
                info!("  👥 Max connections: {}", self.config.server.max_connections);
            }
            Mode::Client(client) => info!("  🛰️ Upstream: {}", client.url()),
        }
        info!("  ⏱️ Tick interval: {}ms", self.config.server.tick_interval_ms);
        info!("  🤝 Handshake timeout: {}ms", self.config.server.handshake_timeout_ms);
        info!(
            "  🔄 Replicate non-object sync values: {}",
            self.config.sync.replicate_non_objects
        );
    }
}

fn apply_overrides(config: &mut AppConfig, args: &CliArgs) {
    if let Some(bind_address) = &args.bind_address {
        config.server.bind_address = bind_address.clone();
    }
    if let Some(log_level) = &args.log_level {
        config.logging.level = log_level.clone();
    }
    if args.json_logs {
        config.logging.json_format = true;
    }
    if let Some(url) = &args.connect {
        config.client.upstream_url = Some(url.clone());
    }
}

/// Logs bus and replication statistics every [`MONITOR_INTERVAL`].
fn spawn_monitor(
    stats: Arc<EventBusCounters>,
    entities: Arc<EntityService>,
    connections: Option<Arc<ConnectionManager>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(MONITOR_INTERVAL);
        interval.tick().await;
        let mut last_published = 0u64;

        loop {
            interval.tick().await;
            let snapshot = stats.snapshot();
            let published = snapshot.events_published - last_published;
            last_published = snapshot.events_published;

            let open = match &connections {
                Some(manager) => manager.connection_count().await,
                None => 0,
            };
            info!(
                "📊 Host Health - {} events/min | {} handlers | {} failures | {} entities | {} replicas | {} sockets",
                published,
                snapshot.total_handlers,
                snapshot.handler_failures,
                entities.entity_count(),
                entities.replica_ids().len(),
                open
            );
        }
    })
}

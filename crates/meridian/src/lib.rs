//! # Meridian - Main Entry Point
//!
//! Runs a Meridian host from the command line: an authoritative server by
//! default, or a client linked to an upstream server with `--connect`.
//!
//! ## Quick Start
//!
//! ```bash
//! # Run a server with default configuration
//! meridian
//!
//! # Specify custom configuration and override the bind address
//! meridian --config production.toml --bind 0.0.0.0:8080 --log-level debug
//!
//! # Run as a client of another server
//! meridian --connect ws://127.0.0.1:8080
//!
//! # JSON logging for production
//! meridian --json-logs
//! ```
//!
//! ## Configuration
//!
//! Configuration is read from a TOML file (default: `config.toml`). If the
//! file doesn't exist, a default configuration is written there first.
//!
//! ## Signal Handling
//!
//! SIGINT (Ctrl+C) and SIGTERM stop the host gracefully; a second signal
//! exits immediately.

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::AppConfig;

pub use config::{ClientSettings, LoggingSettings, ServerSettings, SyncSettings};

/// Parses arguments, sets up logging and runs the application.
///
/// # Exit Codes
///
/// * **0**: Successful execution and shutdown
/// * **1**: Error during startup, configuration, or runtime
pub async fn init() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Logging comes first, so read the file once just for its settings.
    let mut logging = AppConfig::load_from_file(&args.config_path)
        .await
        .unwrap_or_default()
        .logging;
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Application error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

//! Termination signal handling.
//!
//! The first SIGINT/SIGTERM (Ctrl+C on Windows) starts a graceful shutdown
//! through the shared [`ShutdownState`]; a second one exits immediately.

use meridian_core::ShutdownState;
use tokio::signal;
use tracing::{error, info, warn};

/// Resolves when the process receives a termination signal.
pub async fn wait_for_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await
    }
}

/// Waits for a termination signal and initiates `shutdown_state`.
///
/// Afterwards a background task watches for a second signal and exits the
/// process with status 1 if one arrives before shutdown finishes.
pub async fn setup_signal_handlers(
    shutdown_state: &ShutdownState,
) -> Result<(), Box<dyn std::error::Error>> {
    wait_for_signal().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    shutdown_state.initiate_shutdown();

    tokio::spawn(async {
        if let Err(e) = wait_for_signal().await {
            error!("Failed to set up forced shutdown signal handler: {e}");
            return;
        }
        warn!("Shutdown signal received again, exiting immediately");
        std::process::exit(1);
    });

    Ok(())
}

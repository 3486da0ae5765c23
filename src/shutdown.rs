//! Signal-driven graceful shutdown
//!
//! ```rust,no_run
//! use hybrid_cache::{cache::HybridManager, config::ConfigManager, shutdown};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ConfigManager::load()?;
//! let manager = HybridManager::from_config(config.config_arc())?;
//! manager.ensure_ready().await;
//!
//! shutdown::shutdown_signal().await;
//! shutdown::close_cache(&manager, config.config().shutdown_grace_period()).await;
//! # Ok(())
//! # }
//! ```

use crate::cache::HybridManager;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
///
/// A handler that fails to install is logged and never fires; the other one
/// still does.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}

/// Close both cache handles, giving up after `grace`.
///
/// Returns true if every handle closed in time. Callers exit either way.
pub async fn close_cache(manager: &HybridManager, grace: Duration) -> bool {
    match manager.shutdown(grace).await {
        Ok(()) => {
            info!("Cache connections closed");
            true
        }
        Err(e) => {
            error!(error = %e, "Cache did not close within grace period, exiting anyway");
            false
        }
    }
}

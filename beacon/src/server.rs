//! HTTP server lifecycle
//!
//! Binds the API router and serves it until a shutdown signal arrives or
//! the shared cancellation token fires.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use beacon_core::Config;
use beacon_registry::Services;

pub struct BeaconServer {
    config: Config,
    services: Services,
    token: CancellationToken,
}

impl BeaconServer {
    pub const fn new(config: Config, services: Services, token: CancellationToken) -> Self {
        Self {
            config,
            services,
            token,
        }
    }

    /// Serve HTTP and wait for shutdown
    pub async fn run(self) -> Result<()> {
        let http_addr = self.config.http_address();
        let router = beacon_api::create_router(&self.services);

        let listener = tokio::net::TcpListener::bind(&http_addr)
            .await
            .with_context(|| format!("Failed to bind HTTP address {http_addr}"))?;
        info!("HTTP server listening on {}", http_addr);

        let token = self.token.clone();
        let graceful = async move {
            tokio::select! {
                () = shutdown_signal() => {
                    info!("Shutdown signal received, starting graceful shutdown...");
                    token.cancel();
                }
                () = token.cancelled() => {}
            }
        };

        axum::serve(listener, router)
            .with_graceful_shutdown(graceful)
            .await
            .context("HTTP server error")?;

        info!("HTTP server shut down gracefully");
        Ok(())
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}

//! Gateway lifecycle.
//!
//! Owns the HTTP server task and coordinates graceful shutdown: stop
//! accepting connections, stop the broker consume loop, then give open
//! sessions a bounded window to drain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use taskio_core::Config;
use taskio_realtime::{Notifier, SessionRegistry, StreamBridge};

use crate::http;

/// Grace period for open sessions after the shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Shared service handles the HTTP layer and lifecycle code both hold.
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<SessionRegistry>,
    pub notifier: Arc<Notifier>,
    pub bridge: Arc<StreamBridge>,
}

/// Notification gateway server
pub struct GatewayServer {
    config: Config,
    services: Services,
}

impl GatewayServer {
    pub const fn new(config: Config, services: Services) -> Self {
        Self { config, services }
    }

    /// Serve until a shutdown signal arrives or the HTTP server dies.
    pub async fn start(self) -> anyhow::Result<()> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let http = self.spawn_http_server(shutdown_rx).await?;
        info!("Gateway ready");

        tokio::select! {
            _ = http => error!("HTTP server exited before shutdown was requested"),
            () = shutdown_signal() => info!("Shutdown requested"),
        }

        // Tells axum to stop accepting new connections.
        let _ = shutdown_tx.send(true);
        self.shutdown().await;

        Ok(())
    }

    /// Stop the broker first so no new fan-out reaches sessions, then wait
    /// out the drain window.
    async fn shutdown(&self) {
        self.services.bridge.stop().await;

        let open = self.services.registry.session_count();
        if open > 0 {
            info!(
                sessions = open,
                grace_secs = DRAIN_TIMEOUT.as_secs(),
                "Draining open sessions before exit"
            );
            let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
                while self.services.registry.session_count() > 0 {
                    tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
                }
            })
            .await;

            match drained {
                Ok(()) => info!("All sessions closed"),
                Err(_) => warn!(
                    remaining = self.services.registry.session_count(),
                    "Drain window elapsed with sessions still open"
                ),
            }
        }

        info!("Gateway stopped");
    }

    /// Bind the listener up front so a bad address or occupied port fails
    /// startup instead of surfacing later inside the task.
    async fn spawn_http_server(
        &self,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> anyhow::Result<JoinHandle<()>> {
        let address = self.config.http_address();
        let addr: SocketAddr = address
            .parse()
            .with_context(|| format!("invalid HTTP address '{address}'"))?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        info!(%addr, "HTTP server listening");

        let router = http::create_router(
            self.services.registry.clone(),
            self.services.notifier.clone(),
            self.services.bridge.clone(),
        );

        Ok(tokio::spawn(async move {
            let graceful = async move {
                let _ = shutdown_rx.changed().await;
            };
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(graceful)
                .await
            {
                error!(error = %e, "HTTP server error");
            }
            info!("HTTP server stopped");
        }))
    }
}

/// Resolve once SIGINT (Ctrl+C) or SIGTERM arrives.
async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("Ctrl+C received"),
        () = terminate => info!("SIGTERM received"),
    }
}

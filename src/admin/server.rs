//! Admin API Server
//!
//! Serves the REST router until shutdown is signalled.

use crate::error::{Error, Result};
use std::net::{Ipv4Addr, SocketAddr};
use tokio::sync::broadcast;
use tracing::{error, info};

use super::rest::{AdminState, RestRouter};

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the admin server
#[derive(Debug, Clone)]
pub struct AdminServerConfig {
    /// Bind address
    pub addr: SocketAddr,
}

impl Default for AdminServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8090)),
        }
    }
}

// =============================================================================
// Admin Server
// =============================================================================

pub struct AdminServer {
    config: AdminServerConfig,
    state: AdminState,
    shutdown_tx: broadcast::Sender<()>,
}

impl AdminServer {
    pub fn new(config: AdminServerConfig, state: AdminState) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    /// Spawn the server on the runtime
    pub fn spawn(&self) -> tokio::task::JoinHandle<Result<()>> {
        let addr = self.config.addr;
        let state = self.state.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let result = run_admin_server(addr, state, shutdown_rx).await;
            if let Err(e) = &result {
                error!("Admin server error: {}", e);
            }
            result
        })
    }

    /// Trigger graceful shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

async fn run_admin_server(
    addr: SocketAddr,
    state: AdminState,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let app = RestRouter::new(state).build();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind admin server: {}", e)))?;
    info!("Admin API listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
            info!("Admin server shutting down");
        })
        .await
        .map_err(|e| Error::Internal(format!("Admin server error: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::diagnostics::{Diagnostics, HealthThresholds};
    use crate::cache::invalidation::{InvalidationMode, Invalidator};
    use crate::cache::store::tests::harness;
    use std::sync::Arc;

    #[test]
    fn test_default_config() {
        let config = AdminServerConfig::default();
        assert_eq!(config.addr.port(), 8090);
        assert!(config.addr.ip().is_unspecified());
    }

    #[tokio::test]
    async fn test_shutdown_stops_server() {
        let h = harness();
        let state = AdminState {
            store: h.store.clone(),
            invalidator: Arc::new(Invalidator::new(h.store.clone(), InvalidationMode::Exact)),
            diagnostics: Arc::new(Diagnostics::new(h.store.clone(), HealthThresholds::default())),
        };
        let server = AdminServer::new(
            AdminServerConfig {
                addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            },
            state,
        );

        let handle = server.spawn();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        server.shutdown();
        let result = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}

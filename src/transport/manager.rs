use crate::{
    metrics::DnsMetrics,
    resolver::DnsResolver,
    transport::TransportConfig,
    transport::doh::DohServerConfig,
    transport::{DohServer, DotServer},
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Transport Manager: owns the optional DoT/DoH listeners and their shared
/// shutdown signal, layered in front of the same query pipeline UDP/TCP use.
pub struct TransportManager {
    config: TransportConfig,
    shutdown_tx: broadcast::Sender<()>,
}

impl TransportManager {
    /// Create a new transport manager
    pub fn new(config: TransportConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            shutdown_tx,
        }
    }

    /// Start all configured transport servers
    pub async fn start_servers(
        &self,
        resolver: Arc<DnsResolver>,
        metrics: Option<Arc<DnsMetrics>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut tasks = Vec::new();
        let metrics = metrics
            .unwrap_or_else(|| Arc::new(DnsMetrics::new().expect("Failed to create metrics")));

        // Start DoT server if enabled
        if self.config.enable_dot {
            if let (Some(bind_addr), Some(tls_config)) =
                (self.config.dot_bind_addr, self.config.tls_config.clone())
            {
                info!("Starting DoT server on {}", bind_addr);

                let server = DotServer::new(
                    bind_addr,
                    tls_config,
                    resolver.clone(),
                    Some(metrics.clone()),
                    self.config.max_connections,
                    self.config.connection_timeout,
                    self.config.keepalive_timeout,
                )
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;

                let mut shutdown_rx = self.shutdown_tx.subscribe();
                let dot_task = tokio::spawn(async move {
                    tokio::select! {
                        result = server.run() => {
                            if let Err(e) = result {
                                error!("DoT server error: {}", e);
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("DoT server shutting down");
                        }
                    }
                });
                tasks.push(dot_task);
            } else {
                warn!("DoT enabled but missing bind address or TLS config");
            }
        }

        // Start DoH server if enabled
        if self.config.enable_doh {
            if let Some(bind_addr) = self.config.doh_bind_addr {
                info!("Starting DoH server on {}", bind_addr);

                let doh_config = DohServerConfig {
                    path: self.config.doh_path.clone(),
                    enable_well_known: self.config.doh_enable_well_known,
                    enable_json_api: self.config.doh_enable_json_api,
                    enable_tls: self.config.tls_config.is_some(),
                    ..Default::default()
                };

                let server = DohServer::new(
                    bind_addr,
                    self.config.tls_config.clone(),
                    resolver.clone(),
                    Some(metrics.clone()),
                    doh_config,
                )
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { Box::new(e) })?;

                let mut shutdown_rx = self.shutdown_tx.subscribe();
                let doh_task = tokio::spawn(async move {
                    tokio::select! {
                        result = server.run() => {
                            if let Err(e) = result {
                                error!("DoH server error: {}", e);
                            }
                        }
                        _ = shutdown_rx.recv() => {
                            info!("DoH server shutting down");
                        }
                    }
                });
                tasks.push(doh_task);
            } else {
                warn!("DoH enabled but no bind address specified");
            }
        }

        // Wait for all transport servers to complete
        for task in tasks {
            if let Err(e) = task.await {
                error!("Transport server task error: {}", e);
            }
        }

        Ok(())
    }

    /// Trigger shutdown of all transport servers
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use wardpost::config::DnsConfig;
use wardpost::graceful_shutdown::GracefulShutdown;
use wardpost::http_server::HttpServer;
use wardpost::metrics::DnsMetrics;
use wardpost::rate_limiter::DnsRateLimiter;
use wardpost::resolver::DnsResolver;
use wardpost::server::{run_tcp_server, run_udp_server};
use wardpost::sweeper::Sweeper;
use wardpost::transport::TransportManager;

/// How often the sweeper scans the L1 expiry index for hot, near-expiry
/// entries to refresh ahead of their clients.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let config = DnsConfig::from_env()?;
    config.validate()?;

    let runtime = build_runtime(&config)?;
    runtime.block_on(run(config))
}

fn build_runtime(config: &DnsConfig) -> std::io::Result<tokio::runtime::Runtime> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if config.worker_threads > 0 {
        builder.worker_threads(config.worker_threads);
    }
    if config.blocking_threads > 0 {
        builder.max_blocking_threads(config.blocking_threads);
    }
    builder.build()
}

async fn run(config: DnsConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,wardpost=debug".to_string()),
        )
        .init();

    info!("Starting wardpost DNS server on {}", config.bind_addr);

    let metrics = Arc::new(DnsMetrics::new()?);
    metrics.update_runtime_config(config.worker_threads, config.max_concurrent_queries);

    let rate_limiter = Arc::new(DnsRateLimiter::new(config.rate_limit_config.clone()));
    let query_semaphore = Arc::new(Semaphore::new(config.max_concurrent_queries));

    let resolver = Arc::new(DnsResolver::new(config.clone(), Some(metrics.clone())).await?);
    resolver.attach_self();

    let shutdown = Arc::new(GracefulShutdown::new(resolver.clone()));

    // Background sweeper: proactively refreshes hot, near-expiry entries
    // found in the L1 expiry index. Only meaningful when both the tiered
    // cache and its refresh coordinator are present (i.e. Redis is wired up).
    if let (Some(tiered_cache), Some(refresh_coordinator)) =
        (resolver.tiered_cache.clone(), resolver.refresh_coordinator.clone())
    {
        let sweeper = Arc::new(Sweeper::new(
            tiered_cache,
            refresh_coordinator,
            resolver.clone(),
            SWEEP_INTERVAL,
        ));
        let sweeper_for_run = sweeper.clone();
        tokio::spawn(async move {
            sweeper_for_run.run().await;
        });
        shutdown
            .register_component("sweeper".to_string(), move || {
                let sweeper = sweeper.clone();
                async move {
                    drop(sweeper);
                    Ok(())
                }
            })
            .await;
    }

    let mut tasks = Vec::new();

    let udp_shutdown_rx = shutdown.subscribe();
    tasks.push(tokio::spawn(run_udp_server(
        config.clone(),
        resolver.clone(),
        query_semaphore.clone(),
        rate_limiter.clone(),
        metrics.clone(),
        udp_shutdown_rx,
    )));

    let tcp_shutdown_rx = shutdown.subscribe();
    tasks.push(tokio::spawn(run_tcp_server(
        config.clone(),
        resolver.clone(),
        query_semaphore.clone(),
        rate_limiter.clone(),
        metrics.clone(),
        tcp_shutdown_rx,
    )));

    if let Some(http_bind_addr) = config.http_bind_addr {
        let http_server = HttpServer::new(
            resolver.clone(),
            Some(rate_limiter.clone()),
            metrics.clone(),
            http_bind_addr,
        );
        tasks.push(tokio::spawn(async move {
            http_server
                .start()
                .await
                .map_err(|e| -> Box<dyn std::error::Error + Send + Sync> { e.to_string().into() })
        }));
    }

    if config.transport_config.enable_dot || config.transport_config.enable_doh {
        let transport_manager = Arc::new(TransportManager::new(config.transport_config.clone()));
        let transport_resolver = resolver.clone();
        let transport_metrics = metrics.clone();
        tasks.push(tokio::spawn(async move {
            transport_manager
                .start_servers(transport_resolver, Some(transport_metrics))
                .await
        }));
    }

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down");
        }
    }

    if let Err(e) = shutdown.shutdown().await {
        error!("Error during graceful shutdown: {}", e);
    }

    for task in tasks {
        task.abort();
    }

    warn!("wardpost shut down");
    Ok(())
}

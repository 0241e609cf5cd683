//! Flash-sale service.
//!
//! Admission on the Redis fast path, asynchronous fulfillment into
//! `PostgreSQL`.

use flashsale_runtime::metrics::MetricsServer;
use flashsale_server::{Config, FlashSaleApp, lifecycle::shutdown_signal};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flashsale=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting flash-sale service");

    // Load configuration
    let config = Config::from_env()?;
    info!(
        redis_url = %config.redis.url,
        workers = config.fulfillment.workers,
        stream = %config.fulfillment.stream,
        group = %config.fulfillment.group,
        "Configuration loaded"
    );

    // Metrics exporter
    let mut metrics = MetricsServer::new(config.server.metrics_addr);
    metrics.start()?;

    // Stores, cache and admission
    let shutdown_timeout = config.shutdown_timeout();
    let app = FlashSaleApp::new(config).await?;

    // Fulfillment workers and recovery sweeper
    let pipeline = app.start_pipeline().await?;
    info!(consumers = ?pipeline.consumers(), "Flash-sale service running");

    shutdown_signal().await;

    info!("Shutting down...");
    pipeline.stop(shutdown_timeout).await;
    info!("Flash-sale service stopped");

    Ok(())
}

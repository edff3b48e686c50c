//! Offer queue sweeper.
//!
//! Expires lapsed offers and promotes waiting buyers against the Postgres queue store on a
//! fixed interval, until Ctrl+C or SIGTERM.

mod config;

use config::Config;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use ticket_queue_core::environment::SystemClock;
use ticket_queue_postgres::PostgresQueueStore;
use ticket_queue_runtime::metrics::MetricsServer;
use ticket_queue_runtime::{OfferScheduler, Sweeper};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ticket queue sweeper");
    let queue_config = config.queue_config()?;
    info!(
        offer_window_secs = config.queue.offer_window_secs,
        sweep_interval_secs = config.queue.sweep_interval_secs,
        fulfillment = %config.queue.fulfillment,
        sweep_batch_size = config.queue.sweep_batch_size,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(config.metrics_addr()?);
    metrics.start()?;

    info!("Connecting to queue database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .acquire_timeout(Duration::from_secs(config.database.connect_timeout))
        .idle_timeout(Duration::from_secs(config.database.idle_timeout))
        .connect(&config.database.url)
        .await?;
    let store = PostgresQueueStore::from_pool(pool.clone());
    store.migrate().await?;
    info!("Queue database ready");

    let scheduler = OfferScheduler::new(Arc::new(store), Arc::new(SystemClock), &queue_config)?;
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = Sweeper::new(
        Arc::new(scheduler),
        queue_config.sweep_interval,
        shutdown_rx,
    )
    .spawn();

    shutdown_signal().await;
    info!("Shutting down...");
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(config.shutdown_timeout(), handle).await {
        Ok(Ok(())) => info!("Sweeper stopped gracefully"),
        Ok(Err(e)) => warn!(error = %e, "Sweeper task failed"),
        Err(_) => warn!("Sweeper shutdown timed out"),
    }

    pool.close().await;
    info!("Shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
///
/// If a handler cannot be installed that signal is ignored and the other still works.
async fn shutdown_signal() {
    use tokio::signal;

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
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}

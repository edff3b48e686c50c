//! Prometheus metrics for the offer queue.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `ticket_queue_joins_total{outcome}`: joins by outcome (`created`, `existing`)
//! - `ticket_queue_offers_total`: waiting entries promoted to offered
//! - `ticket_queue_offered_tickets_total`: tickets reserved by offers
//! - `ticket_queue_expirations_total`: offers expired (lazily or by the sweep)
//! - `ticket_queue_cancellations_total{from}`: entries cancelled, by prior status
//! - `ticket_queue_purchases_total`: purchases completed
//! - `ticket_queue_tickets_sold_total`: tickets sold
//! - `ticket_queue_revenue_cents_total`: revenue from completed purchases
//! - `ticket_queue_promotion_conflicts_total`: promotions that lost a race
//! - `ticket_queue_retry_attempts_total`, `_successes_total`, `_exhausted_total`
//!
//! ## Histograms
//! - `ticket_queue_sweep_duration_seconds`: time taken by one sweep pass
//! - `ticket_queue_sweep_expired`: offers expired per sweep pass
//!
//! # Example
//!
//! ```rust,no_run
//! use ticket_queue_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! # Ok(())
//! # }
//! ```

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use ticket_queue_core::EntryStatus;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus exporter serving `/metrics` over HTTP.
pub struct MetricsServer {
    addr: SocketAddr,
    installed: bool,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            installed: false,
        }
    }

    /// Register metric descriptions, install the global recorder and start the HTTP
    /// listener. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        builder
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        register_metrics();
        self.installed = true;

        tracing::info!(addr = %self.addr, "Metrics available at http://{}/metrics", self.addr);
        Ok(())
    }

    /// Whether [`start`](Self::start) succeeded
    #[must_use]
    pub const fn is_running(&self) -> bool {
        self.installed
    }
}

/// Register all metric descriptions.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_metrics() {
    describe_counter!("ticket_queue_joins_total", "Joins by outcome (created, existing)");
    describe_counter!(
        "ticket_queue_offers_total",
        "Waiting entries promoted to offered"
    );
    describe_counter!(
        "ticket_queue_offered_tickets_total",
        "Tickets reserved by offers"
    );
    describe_counter!(
        "ticket_queue_expirations_total",
        "Offers expired past their deadline"
    );
    describe_counter!(
        "ticket_queue_cancellations_total",
        "Entries cancelled by decline or leave, by prior status"
    );
    describe_counter!("ticket_queue_purchases_total", "Purchases completed");
    describe_counter!("ticket_queue_tickets_sold_total", "Tickets sold");
    describe_counter!(
        "ticket_queue_revenue_cents_total",
        "Revenue from completed purchases in cents"
    );
    describe_counter!(
        "ticket_queue_promotion_conflicts_total",
        "Promotions that lost a race to a concurrent writer"
    );
    describe_histogram!(
        "ticket_queue_sweep_duration_seconds",
        "Time taken by one sweep pass"
    );
    describe_histogram!("ticket_queue_sweep_expired", "Offers expired per sweep pass");
    describe_counter!("ticket_queue_retry_attempts_total", "Retries of transient failures");
    describe_counter!(
        "ticket_queue_retry_successes_total",
        "Operations that succeeded after retrying"
    );
    describe_counter!(
        "ticket_queue_retry_exhausted_total",
        "Operations that failed after exhausting retries"
    );
}

/// Queue lifecycle metrics recorder.
pub struct QueueMetrics;

impl QueueMetrics {
    /// Record a join.
    pub fn record_join(created: bool) {
        let outcome = if created { "created" } else { "existing" };
        counter!("ticket_queue_joins_total", "outcome" => outcome).increment(1);
    }

    /// Record a promotion to offered.
    pub fn record_offer(quantity: u32) {
        counter!("ticket_queue_offers_total").increment(1);
        counter!("ticket_queue_offered_tickets_total").increment(u64::from(quantity));
    }

    /// Record an expired offer.
    pub fn record_expiry() {
        counter!("ticket_queue_expirations_total").increment(1);
    }

    /// Record a cancellation from `from`.
    pub fn record_cancellation(from: EntryStatus) {
        counter!("ticket_queue_cancellations_total", "from" => from.as_str()).increment(1);
    }

    /// Record a completed purchase.
    pub fn record_purchase(quantity: u32, revenue_cents: u64) {
        counter!("ticket_queue_purchases_total").increment(1);
        counter!("ticket_queue_tickets_sold_total").increment(u64::from(quantity));
        counter!("ticket_queue_revenue_cents_total").increment(revenue_cents);
    }

    /// Record a promotion that lost a race.
    pub fn record_conflict() {
        counter!("ticket_queue_promotion_conflicts_total").increment(1);
    }

    /// Record a sweep pass.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_sweep(duration: Duration, expired: usize) {
        histogram!("ticket_queue_sweep_duration_seconds").record(duration.as_secs_f64());
        histogram!("ticket_queue_sweep_expired").record(expired as f64);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("ticket_queue_retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("ticket_queue_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("ticket_queue_retry_exhausted_total").increment(1);
    }
}

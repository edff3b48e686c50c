//! Background sweeper: expires lapsed offers on a fixed interval.
//!
//! Lazy expiry handles entries somebody touches; the sweeper handles the rest, and also
//! re-runs promotion for categories whose earlier cascade failed. A failed pass is retried on
//! transient store errors and otherwise logged and left to the next tick, so the task only
//! ends on shutdown.

use crate::retry::{RetryPolicy, retry_transient};
use crate::scheduler::{OfferScheduler, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use ticket_queue_core::QueueError;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

/// Periodic sweep task.
pub struct Sweeper {
    scheduler: Arc<OfferScheduler>,
    interval: Duration,
    retry: RetryPolicy,
    shutdown: broadcast::Receiver<()>,
}

impl Sweeper {
    /// Create a sweeper that runs every `interval` until `shutdown` fires.
    #[must_use]
    pub fn new(
        scheduler: Arc<OfferScheduler>,
        interval: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            scheduler,
            interval,
            retry: RetryPolicy::default(),
            shutdown,
        }
    }

    /// Override the retry policy applied to each pass
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Spawn the sweeper onto the current runtime.
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    /// Run one pass, retrying transient store failures.
    ///
    /// # Errors
    ///
    /// Returns the last error once it is non-transient or retries are exhausted.
    pub async fn run_once(&self) -> Result<SweepReport, QueueError> {
        let scheduler = Arc::clone(&self.scheduler);
        retry_transient(self.retry.clone(), move || {
            let scheduler = Arc::clone(&scheduler);
            async move { scheduler.sweep().await }
        })
        .await
    }

    async fn run(&mut self) {
        tracing::info!(interval_ms = self.interval_millis(), "Sweeper started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, code = e.code(), "Sweep pass failed");
                    }
                }
            }
        }

        tracing::info!("Sweeper stopped");
    }

    fn interval_millis(&self) -> u64 {
        u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX)
    }
}

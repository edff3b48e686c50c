//! Offer scheduler: promotes waiting entries, expires lapsed offers, runs the sweep.
//!
//! # State machine
//!
//! ```text
//! waiting ──► offered ──► purchasing ──► purchased
//!    │           │             │
//!    │           ├──► expired  │
//!    └───────────┴─────────────┴──► cancelled
//! ```
//!
//! Every edge is a [`Transition`]: a compare-and-swap on status applied together with its
//! ledger effect. Two schedulers racing for the same entry or the same free ticket are
//! resolved by the store; the loser sees `InvalidTransition` or `InsufficientInventory`
//! and re-reads current state instead of retrying blindly.
//!
//! # Promotion
//!
//! Promotion is a bounded loop. Each iteration reads the current availability and the
//! current earliest waiting entry from the store (never a cached list), offers it as much as
//! the [`FulfillmentPolicy`] allows, and stops as soon as the head cannot be served.
//! Later entries are never offered ahead of an earlier one. The exception is a head that
//! asks for more tickets than remain unsold: nothing can ever satisfy it, so it is cancelled
//! and promotion moves on to the next entry.

use crate::config::{ConfigError, FulfillmentPolicy, QueueConfig};
use crate::metrics::QueueMetrics;
use crate::queue::QueueBook;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use ticket_queue_core::environment::Clock;
use ticket_queue_core::{
    CategoryId, EntryStatus, QueueEntry, QueueError, QueueStore, Transition,
};

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Offers moved to expired by this pass
    pub expired: usize,
    /// Tickets released by those expiries
    pub released: u64,
    /// Lapsed offers another writer had already moved on
    pub skipped: usize,
    /// Entries promoted to offered during the cascade
    pub promoted: usize,
    /// Categories whose queues were re-evaluated
    pub categories: usize,
}

/// Drives entries through the offer state machine.
#[derive(Clone)]
pub struct OfferScheduler {
    store: Arc<dyn QueueStore>,
    book: QueueBook,
    clock: Arc<dyn Clock>,
    offer_window: chrono::Duration,
    policy: FulfillmentPolicy,
    sweep_batch_size: usize,
    max_promotions_per_pass: usize,
}

impl OfferScheduler {
    /// Create a scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        config: &QueueConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            book: QueueBook::new(Arc::clone(&store)),
            store,
            clock,
            offer_window: config.offer_window_delta()?,
            policy: config.fulfillment,
            sweep_batch_size: config.sweep_batch_size,
            max_promotions_per_pass: config.max_promotions_per_pass,
        })
    }

    /// Fulfilment policy in force
    #[must_use]
    pub const fn policy(&self) -> FulfillmentPolicy {
        self.policy
    }

    /// Promote waiting entries of a category while inventory allows, in position order.
    ///
    /// Returns the entries this call moved to offered. Lost races leave the contested entry
    /// waiting; the loop re-reads state and carries on. Categories that are inactive or
    /// outside their sale window are left alone.
    ///
    /// # Errors
    ///
    /// - `CategoryNotFound`: unknown category
    /// - `StoreUnavailable`: the store failed
    pub async fn promote_waiting(
        &self,
        category_id: CategoryId,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let category = self
            .store
            .load_category(category_id)
            .await?
            .ok_or(QueueError::CategoryNotFound(category_id))?;
        let now = self.clock.now();
        if !category.is_on_sale(now) {
            tracing::debug!(category_id = %category_id, "Category not on sale, skipping promotion");
            return Ok(Vec::new());
        }

        let mut offered = Vec::new();
        for _ in 0..self.max_promotions_per_pass {
            let available = self.store.available(category_id).await?;
            if available == 0 {
                break;
            }
            let Some(head) = self.book.head(category_id).await? else {
                break;
            };
            let Some(quantity) = self.policy.offer_quantity(head.requested_quantity, available)
            else {
                let unsold = self
                    .store
                    .load_category(category_id)
                    .await?
                    .map_or(0, |c| c.total.saturating_sub(c.sold));
                if head.requested_quantity <= unsold {
                    tracing::debug!(
                        entry_id = %head.id,
                        requested = head.requested_quantity,
                        available,
                        "Head of queue does not fit yet"
                    );
                    break;
                }
                self.drop_unservable(&head, unsold).await?;
                continue;
            };

            let expires_at = now + self.offer_window;
            match self
                .book
                .transition(Transition::offer(head.id, quantity, expires_at, now))
                .await
            {
                Ok(entry) => {
                    QueueMetrics::record_offer(quantity);
                    tracing::info!(
                        entry_id = %entry.id,
                        category_id = %category_id,
                        requester = %entry.requester,
                        requested = entry.requested_quantity,
                        offered = quantity,
                        expires_at = %expires_at,
                        "Offer made"
                    );
                    offered.push(entry);
                }
                Err(
                    e @ (QueueError::InsufficientInventory { .. }
                    | QueueError::InvalidTransition { .. }),
                ) => {
                    QueueMetrics::record_conflict();
                    tracing::debug!(
                        entry_id = %head.id,
                        error = %e,
                        "Promotion lost a race, re-reading queue"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(offered)
    }

    /// Promotion after capacity was freed. Failures are logged, not returned: the freeing
    /// transition has already committed and the next sweep promotes again.
    pub async fn cascade(&self, category_id: CategoryId) -> Vec<QueueEntry> {
        match self.promote_waiting(category_id).await {
            Ok(offered) => offered,
            Err(e) => {
                tracing::warn!(
                    category_id = %category_id,
                    error = %e,
                    "Cascade promotion failed, leaving it to the sweep"
                );
                Vec::new()
            }
        }
    }

    /// Expire an offered entry, release its reservation and promote the next in line.
    ///
    /// Returns `None` if the entry was no longer offered (another writer got there first),
    /// so running this twice never releases twice.
    ///
    /// # Errors
    ///
    /// - `EntryNotFound`, `StoreUnavailable`
    pub async fn expire_offer(&self, entry: &QueueEntry) -> Result<Option<QueueEntry>, QueueError> {
        let Some(expired) = self.expire_only(entry).await? else {
            return Ok(None);
        };
        self.cascade(expired.category_id).await;
        Ok(Some(expired))
    }

    /// Apply lazy expiry: expire `entry` if its offer has lapsed.
    ///
    /// Returns the expired entry when an expiry happened (here or concurrently elsewhere).
    ///
    /// # Errors
    ///
    /// - `EntryNotFound`, `StoreUnavailable`
    pub async fn expire_if_lapsed(
        &self,
        entry: &QueueEntry,
    ) -> Result<Option<QueueEntry>, QueueError> {
        if !entry.is_offer_lapsed(self.clock.now()) {
            return Ok(None);
        }
        match self.expire_offer(entry).await? {
            Some(expired) => Ok(Some(expired)),
            None => {
                let current = self.book.get(entry.id).await?;
                Ok((current.status == EntryStatus::Expired).then_some(current))
            }
        }
    }

    /// Cancel an entry from its current status, releasing any reservation, and promote the
    /// next in line if capacity was freed.
    ///
    /// A waiting entry that was offered in the meantime has that offer cancelled instead.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: the entry changed status concurrently
    /// - `EntryNotFound`, `StoreUnavailable`
    pub async fn cancel(&self, entry: &QueueEntry) -> Result<QueueEntry, QueueError> {
        match self.cancel_from(entry).await {
            // Promoted between the caller's read and the cancel: give up the new offer too.
            Err(QueueError::InvalidTransition {
                actual: EntryStatus::Offered,
                ..
            }) if entry.status == EntryStatus::Waiting => {
                let current = self.book.get(entry.id).await?;
                if current.status != EntryStatus::Offered {
                    return Err(QueueError::InvalidTransition {
                        entry_id: entry.id,
                        expected: entry.status,
                        actual: current.status,
                    });
                }
                tracing::debug!(
                    entry_id = %entry.id,
                    "Entry was offered concurrently, cancelling the offer"
                );
                self.cancel_from(&current).await
            }
            other => other,
        }
    }

    async fn cancel_from(&self, entry: &QueueEntry) -> Result<QueueEntry, QueueError> {
        let now = self.clock.now();
        let held = entry.held_quantity();
        let cancelled = self
            .book
            .transition(Transition::cancel(entry.id, entry.status, held, now))
            .await?;

        QueueMetrics::record_cancellation(entry.status);
        tracing::info!(
            entry_id = %entry.id,
            category_id = %entry.category_id,
            from = %entry.status,
            released = held,
            "Entry cancelled"
        );

        if held > 0 {
            self.cascade(entry.category_id).await;
        }
        Ok(cancelled)
    }

    /// Expire every lapsed offer across all categories, then re-run promotion for each
    /// category that freed capacity or still has waiting entries.
    ///
    /// Safe to run concurrently with itself: each expiry is a compare-and-swap, so an offer
    /// expired by one pass is skipped by the other.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed (the pass may be retried as a whole)
    pub async fn sweep(&self) -> Result<SweepReport, QueueError> {
        let started = Instant::now();
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut touched = BTreeSet::new();

        loop {
            let batch = self
                .store
                .list_expired_offers(now, self.sweep_batch_size)
                .await?;
            let mut expired_in_batch = 0;

            for entry in &batch {
                match self.expire_only(entry).await? {
                    Some(expired) => {
                        expired_in_batch += 1;
                        report.released += u64::from(expired.offered_quantity);
                        touched.insert(expired.category_id);
                    }
                    None => report.skipped += 1,
                }
            }
            report.expired += expired_in_batch;

            // A batch of nothing but skips means another sweeper is ahead on the same rows.
            if batch.len() < self.sweep_batch_size || expired_in_batch == 0 {
                break;
            }
        }

        touched.extend(self.store.categories_with_waiting().await?);
        report.categories = touched.len();
        for category_id in touched {
            report.promoted += self.promote_waiting(category_id).await?.len();
        }

        QueueMetrics::record_sweep(started.elapsed(), report.expired);
        tracing::info!(
            expired = report.expired,
            released = report.released,
            skipped = report.skipped,
            promoted = report.promoted,
            categories = report.categories,
            "Sweep complete"
        );
        Ok(report)
    }

    /// Cancel a waiting head that wants more than `unsold` tickets. Losing the race to
    /// another writer is fine; the caller re-reads the queue either way.
    async fn drop_unservable(&self, head: &QueueEntry, unsold: u32) -> Result<(), QueueError> {
        let now = self.clock.now();
        match self
            .book
            .transition(Transition::cancel(head.id, EntryStatus::Waiting, 0, now))
            .await
        {
            Ok(_) => {
                QueueMetrics::record_cancellation(EntryStatus::Waiting);
                tracing::warn!(
                    entry_id = %head.id,
                    category_id = %head.category_id,
                    requester = %head.requester,
                    requested = head.requested_quantity,
                    unsold,
                    "Request can never be filled, removed from queue"
                );
                Ok(())
            }
            Err(QueueError::InvalidTransition { .. }) => {
                QueueMetrics::record_conflict();
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// `offered -> expired` without the cascade.
    async fn expire_only(&self, entry: &QueueEntry) -> Result<Option<QueueEntry>, QueueError> {
        let now = self.clock.now();
        match self
            .book
            .transition(Transition::expire(entry.id, entry.offered_quantity, now))
            .await
        {
            Ok(expired) => {
                QueueMetrics::record_expiry();
                tracing::info!(
                    entry_id = %expired.id,
                    category_id = %expired.category_id,
                    requester = %expired.requester,
                    released = expired.offered_quantity,
                    "Offer expired"
                );
                Ok(Some(expired))
            }
            Err(QueueError::InvalidTransition { actual, .. }) => {
                tracing::debug!(
                    entry_id = %entry.id,
                    actual = %actual,
                    "Offer already moved on, nothing to expire"
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

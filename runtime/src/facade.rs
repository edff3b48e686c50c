//! The command/query surface consumed by checkout and UI code.
//!
//! [`TicketQueue`] validates requests, checks ownership, applies lazy expiry at every entry
//! point that touches an offer, and delegates state changes to the [`OfferScheduler`].
//! All errors are typed [`QueueError`]s; only `StoreUnavailable` is worth retrying.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use ticket_queue_core::environment::SystemClock;
//! use ticket_queue_core::{EventId, Money, RequesterId, TicketCategory, Utc};
//! use ticket_queue_runtime::{QueueConfig, TicketQueue};
//! use ticket_queue_testing::InMemoryQueueStore;
//!
//! # tokio_test::block_on(async {
//! let queue = TicketQueue::new(
//!     Arc::new(InMemoryQueueStore::new()),
//!     Arc::new(SystemClock),
//!     QueueConfig::default(),
//! )?;
//!
//! let event_id = EventId::new();
//! let category = TicketCategory::new(event_id, "General", Money::from_cents(5_000), 100, Utc::now());
//! queue.register_category(category.clone()).await?;
//!
//! let joined = queue
//!     .join_queue(event_id, category.id, RequesterId::new("alice"), 2)
//!     .await?;
//! let handle = queue.accept_offer(joined.entry.id, &RequesterId::new("alice")).await?;
//! assert_eq!(handle.total, Money::from_cents(10_000));
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

use crate::config::{ConfigError, FulfillmentPolicy, QueueConfig};
use crate::ledger::InventoryLedger;
use crate::metrics::QueueMetrics;
use crate::queue::QueueBook;
use crate::scheduler::{OfferScheduler, SweepReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ticket_queue_core::environment::Clock;
use ticket_queue_core::{
    CategoryId, EntryId, EntryStatus, EventId, Money, QueueEntry, QueueError, QueueStore,
    RequesterId, TicketCategory, Transition,
};

/// Result of [`TicketQueue::join_queue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinOutcome {
    /// The requester's active entry (already offered if inventory was free)
    pub entry: QueueEntry,
    /// `false` when the requester already had an active entry and it was returned as is
    pub created: bool,
}

/// What the checkout collaborator needs to take payment for an accepted offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseHandle {
    /// Entry being purchased
    pub entry_id: EntryId,
    /// Category
    pub category_id: CategoryId,
    /// Buyer
    pub requester: RequesterId,
    /// Tickets reserved for this purchase
    pub quantity: u32,
    /// Price per ticket
    pub unit_price: Money,
    /// `unit_price * quantity`
    pub total: Money,
    /// Deadline the offer was accepted under
    pub offer_expires_at: Option<DateTime<Utc>>,
}

/// Read-only view of a requester's place in a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionView {
    /// The entry as currently stored
    pub entry: QueueEntry,
    /// 1-based rank among waiting entries; `None` unless waiting
    pub rank: Option<usize>,
    /// Waiting entries ahead
    pub entries_ahead: usize,
    /// Tickets requested by the entries ahead
    pub tickets_ahead: u64,
    /// The offer lapsed; the requester has to join again
    pub should_rejoin: bool,
}

/// Inventory snapshot for a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Category
    pub category_id: CategoryId,
    /// Capacity
    pub total: u32,
    /// Sold
    pub sold: u32,
    /// Held by offers and checkouts in progress
    pub reserved: u32,
    /// `max(0, total - sold - reserved)`
    pub available: u32,
    /// Entries currently waiting
    pub waiting_entries: usize,
    /// Active and inside the sale window
    pub on_sale: bool,
}

/// The ticket offer queue engine.
#[derive(Clone)]
pub struct TicketQueue {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
    ledger: InventoryLedger,
    book: QueueBook,
    scheduler: OfferScheduler,
}

impl TicketQueue {
    /// Build the engine over a store and a clock.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` does not validate.
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        config: QueueConfig,
    ) -> Result<Self, ConfigError> {
        let scheduler = OfferScheduler::new(Arc::clone(&store), Arc::clone(&clock), &config)?;
        Ok(Self {
            ledger: InventoryLedger::new(Arc::clone(&store)),
            book: QueueBook::new(Arc::clone(&store)),
            store,
            clock,
            config,
            scheduler,
        })
    }

    /// Configuration in force
    #[must_use]
    pub const fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// The scheduler, for the sweeper task
    #[must_use]
    pub const fn scheduler(&self) -> &OfferScheduler {
        &self.scheduler
    }

    /// The inventory ledger
    #[must_use]
    pub const fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    /// Add a category when an event is configured.
    ///
    /// # Errors
    ///
    /// - `Validation`: duplicate ID or inconsistent counts
    /// - `StoreUnavailable`: the store failed
    pub async fn register_category(&self, category: TicketCategory) -> Result<(), QueueError> {
        let (category_id, event_id, total) = (category.id, category.event_id, category.total);
        self.store.insert_category(category).await?;
        tracing::info!(
            category_id = %category_id,
            event_id = %event_id,
            total,
            "Category registered"
        );
        Ok(())
    }

    /// Join the queue for `quantity` tickets.
    ///
    /// The entry is appended as waiting and promotion runs straight away, so a requester
    /// who joins while tickets are free comes back already holding an offer (provided
    /// nobody is waiting ahead of them). Joining again while an entry is active returns that
    /// entry unchanged; joining while holding a lapsed offer expires it and starts over at
    /// the back of the queue.
    ///
    /// # Errors
    ///
    /// - `Validation`: quantity out of range or above the unsold tickets, or the category
    ///   belongs to another event
    /// - `SalesClosed`: inactive category or outside its sale window
    /// - `CategoryNotFound`, `StoreUnavailable`
    pub async fn join_queue(
        &self,
        event_id: EventId,
        category_id: CategoryId,
        requester: RequesterId,
        quantity: u32,
    ) -> Result<JoinOutcome, QueueError> {
        if quantity == 0 || quantity > self.config.max_quantity_per_request {
            return Err(QueueError::Validation(format!(
                "Quantity must be between 1 and {}, got {quantity}",
                self.config.max_quantity_per_request
            )));
        }
        let category = self.category_for_event(event_id, category_id).await?;
        let unsold = category.total.saturating_sub(category.sold);
        if quantity > unsold {
            return Err(QueueError::Validation(format!(
                "Quantity {quantity} exceeds the {unsold} tickets left unsold"
            )));
        }
        let now = self.clock.now();
        if !category.is_on_sale(now) {
            return Err(QueueError::SalesClosed(category_id));
        }

        if let Some(existing) = self.book.get_by_requester(&requester, category_id).await? {
            if self.scheduler.expire_if_lapsed(&existing).await?.is_none() {
                QueueMetrics::record_join(false);
                return Ok(JoinOutcome {
                    entry: existing,
                    created: false,
                });
            }
        }

        let entry = match self
            .book
            .enqueue(event_id, category_id, requester, quantity, now)
            .await
        {
            Ok(entry) => entry,
            Err(QueueError::DuplicateRequest { existing, .. }) => {
                // Lost a race with a concurrent join by the same requester.
                QueueMetrics::record_join(false);
                return Ok(JoinOutcome {
                    entry: self.book.get(existing).await?,
                    created: false,
                });
            }
            Err(e) => return Err(e),
        };

        self.scheduler.cascade(category_id).await;
        QueueMetrics::record_join(true);
        Ok(JoinOutcome {
            entry: self.book.get(entry.id).await?,
            created: true,
        })
    }

    /// Accept an offer: `offered -> purchasing`. The reservation stays held.
    ///
    /// Accepting an entry already in `purchasing` returns the same handle again, so the
    /// checkout collaborator can retry safely.
    ///
    /// # Errors
    ///
    /// - `Unauthorized`: the requester does not own the entry
    /// - `OfferExpired`: the deadline has passed (the offer is expired here if nobody has
    ///   yet, and its tickets go to the next in line)
    /// - `InvalidTransition`: the entry is not offered
    /// - `Validation`: the purchase total overflows (the offer stays as it was)
    /// - `EntryNotFound`, `CategoryNotFound`, `StoreUnavailable`
    pub async fn accept_offer(
        &self,
        entry_id: EntryId,
        requester: &RequesterId,
    ) -> Result<PurchaseHandle, QueueError> {
        let entry = self.owned_entry(entry_id, requester).await?;
        self.reject_if_lapsed(&entry).await?;

        match entry.status {
            EntryStatus::Offered | EntryStatus::Purchasing => {}
            EntryStatus::Expired => return Err(offer_expired(&entry, self.clock.now())),
            actual => {
                return Err(QueueError::InvalidTransition {
                    entry_id,
                    expected: EntryStatus::Offered,
                    actual,
                });
            }
        }

        // Priced before the transition so a refused total leaves the offer untouched.
        let category = self.ledger.category(entry.category_id).await?;
        let total = category
            .price
            .checked_mul(entry.offered_quantity)
            .ok_or_else(|| QueueError::Validation("Purchase total overflows".to_string()))?;

        let accepted = if entry.status == EntryStatus::Purchasing {
            entry
        } else {
            let now = self.clock.now();
            match self.book.transition(Transition::accept(entry.id, now)).await {
                Ok(accepted) => accepted,
                Err(QueueError::InvalidTransition {
                    actual: EntryStatus::Expired,
                    ..
                }) => return Err(offer_expired(&entry, now)),
                Err(e) => return Err(e),
            }
        };

        tracing::info!(
            entry_id = %accepted.id,
            requester = %accepted.requester,
            quantity = accepted.offered_quantity,
            total = %total,
            "Offer accepted"
        );
        Ok(PurchaseHandle {
            entry_id: accepted.id,
            category_id: accepted.category_id,
            requester: accepted.requester,
            quantity: accepted.offered_quantity,
            unit_price: category.price,
            total,
            offer_expires_at: accepted.offer_expires_at,
        })
    }

    /// Finalize a purchase after payment succeeded: `purchasing -> purchased`, converting
    /// the reservation into a sale. Completing an already purchased entry returns it as is.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: the entry is not purchasing
    /// - `EntryNotFound`, `StoreUnavailable`
    pub async fn complete_purchase(&self, entry_id: EntryId) -> Result<QueueEntry, QueueError> {
        let entry = self.book.get(entry_id).await?;
        if entry.status == EntryStatus::Purchased {
            return Ok(entry);
        }
        if entry.status != EntryStatus::Purchasing {
            return Err(QueueError::InvalidTransition {
                entry_id,
                expected: EntryStatus::Purchasing,
                actual: entry.status,
            });
        }

        let now = self.clock.now();
        let purchased = self
            .book
            .transition(Transition::complete(entry.id, entry.offered_quantity, now))
            .await?;

        let revenue = self
            .store
            .load_category(purchased.category_id)
            .await?
            .and_then(|c| c.price.checked_mul(purchased.offered_quantity))
            .map_or(0, |total| total.cents());
        QueueMetrics::record_purchase(purchased.offered_quantity, revenue);
        tracing::info!(
            entry_id = %purchased.id,
            category_id = %purchased.category_id,
            requester = %purchased.requester,
            quantity = purchased.offered_quantity,
            "Purchase completed"
        );

        // A sale can leave the head of the queue asking for more than will ever be free.
        if self.scheduler.policy() == FulfillmentPolicy::AllOrNothing {
            self.scheduler.cascade(purchased.category_id).await;
        }
        Ok(purchased)
    }

    /// Decline an offer, or abandon checkout after a failed payment: `offered|purchasing ->
    /// cancelled`. The reservation is released and the next in line is promoted.
    ///
    /// # Errors
    ///
    /// - `Unauthorized`: the requester does not own the entry
    /// - `OfferExpired`: the offer lapsed before the decline (it is expired instead)
    /// - `InvalidTransition`: the entry holds no offer
    /// - `EntryNotFound`, `StoreUnavailable`
    pub async fn decline_offer(
        &self,
        entry_id: EntryId,
        requester: &RequesterId,
    ) -> Result<QueueEntry, QueueError> {
        let entry = self.owned_entry(entry_id, requester).await?;
        self.reject_if_lapsed(&entry).await?;

        if entry.status == EntryStatus::Expired {
            return Err(offer_expired(&entry, self.clock.now()));
        }
        if !entry.status.holds_reservation() {
            return Err(QueueError::InvalidTransition {
                entry_id,
                expected: EntryStatus::Offered,
                actual: entry.status,
            });
        }
        self.scheduler.cancel(&entry).await
    }

    /// Leave the queue: `waiting|offered -> cancelled`, releasing any offer.
    ///
    /// Leaving an entry that is already out of the queue (cancelled, or expired, including
    /// an offer that lapses during this call) returns it without change.
    ///
    /// # Errors
    ///
    /// - `Unauthorized`: the requester does not own the entry
    /// - `InvalidTransition`: the entry is in checkout or purchased
    /// - `EntryNotFound`, `StoreUnavailable`
    pub async fn leave_queue(
        &self,
        entry_id: EntryId,
        requester: &RequesterId,
    ) -> Result<QueueEntry, QueueError> {
        let entry = self.owned_entry(entry_id, requester).await?;
        if let Some(expired) = self.scheduler.expire_if_lapsed(&entry).await? {
            return Ok(expired);
        }

        match entry.status {
            EntryStatus::Waiting | EntryStatus::Offered => self.scheduler.cancel(&entry).await,
            EntryStatus::Cancelled | EntryStatus::Expired => Ok(entry),
            actual => Err(QueueError::InvalidTransition {
                entry_id,
                expected: EntryStatus::Waiting,
                actual,
            }),
        }
    }

    /// Where the requester stands in a category's queue.
    ///
    /// A lapsed offer is expired on the spot and reported with `should_rejoin`, as is an
    /// offer the sweep already expired when the requester has not joined since. Returns
    /// `None` if the requester has no active entry otherwise.
    ///
    /// # Errors
    ///
    /// - `Validation`: the category belongs to another event
    /// - `CategoryNotFound`, `StoreUnavailable`
    pub async fn get_position(
        &self,
        event_id: EventId,
        category_id: CategoryId,
        requester: &RequesterId,
    ) -> Result<Option<PositionView>, QueueError> {
        self.category_for_event(event_id, category_id).await?;
        let Some(entry) = self.book.get_by_requester(requester, category_id).await? else {
            let latest = self.book.latest_for_requester(requester, category_id).await?;
            return Ok(latest
                .filter(|e| e.status == EntryStatus::Expired)
                .map(rejoin_view));
        };

        if let Some(expired) = self.scheduler.expire_if_lapsed(&entry).await? {
            return Ok(Some(rejoin_view(expired)));
        }

        let rank = self.book.rank_of(&entry).await?;
        Ok(Some(PositionView {
            rank: rank.map(|r| r.rank),
            entries_ahead: rank.map_or(0, |r| r.entries_ahead),
            tickets_ahead: rank.map_or(0, |r| r.tickets_ahead),
            should_rejoin: false,
            entry,
        }))
    }

    /// Inventory and demand snapshot for a category.
    ///
    /// # Errors
    ///
    /// - `CategoryNotFound`, `StoreUnavailable`
    pub async fn get_availability(&self, category_id: CategoryId) -> Result<Availability, QueueError> {
        let category = self.ledger.category(category_id).await?;
        let waiting_entries = self.book.list_waiting(category_id).await?.len();
        Ok(Availability {
            category_id,
            total: category.total,
            sold: category.sold,
            reserved: category.reserved,
            available: category.available(),
            waiting_entries,
            on_sale: category.is_on_sale(self.clock.now()),
        })
    }

    /// Run one sweep pass.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    pub async fn sweep(&self) -> Result<SweepReport, QueueError> {
        self.scheduler.sweep().await
    }

    async fn category_for_event(
        &self,
        event_id: EventId,
        category_id: CategoryId,
    ) -> Result<TicketCategory, QueueError> {
        let category = self.ledger.category(category_id).await?;
        if category.event_id != event_id {
            return Err(QueueError::Validation(format!(
                "Category {category_id} does not belong to event {event_id}"
            )));
        }
        Ok(category)
    }

    async fn owned_entry(
        &self,
        entry_id: EntryId,
        requester: &RequesterId,
    ) -> Result<QueueEntry, QueueError> {
        let entry = self.book.get(entry_id).await?;
        if !entry.is_owned_by(requester) {
            tracing::warn!(
                entry_id = %entry_id,
                requester = %requester,
                "Requester does not own entry"
            );
            return Err(QueueError::Unauthorized {
                entry_id,
                requester: requester.clone(),
            });
        }
        Ok(entry)
    }

    /// Expire a lapsed offer and turn that into `OfferExpired` for the caller.
    async fn reject_if_lapsed(&self, entry: &QueueEntry) -> Result<(), QueueError> {
        if self.scheduler.expire_if_lapsed(entry).await?.is_some() {
            return Err(offer_expired(entry, self.clock.now()));
        }
        Ok(())
    }
}

const fn rejoin_view(entry: QueueEntry) -> PositionView {
    PositionView {
        entry,
        rank: None,
        entries_ahead: 0,
        tickets_ahead: 0,
        should_rejoin: true,
    }
}

fn offer_expired(entry: &QueueEntry, now: DateTime<Utc>) -> QueueError {
    QueueError::OfferExpired {
        entry_id: entry.id,
        expired_at: entry.offer_expires_at.unwrap_or(now),
    }
}

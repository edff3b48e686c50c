//! # Ticket Queue Testing
//!
//! Testing utilities and helpers for the ticket offer queue.
//!
//! This crate provides:
//! - [`InMemoryQueueStore`]: an atomic, process-local `QueueStore`
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - Fixture builders for categories and join requests
//! - Assertions for the ledger invariants
//!
//! ## Example
//!
//! ```
//! use ticket_queue_testing::{CategoryBuilder, InMemoryQueueStore, new_entry};
//! use ticket_queue_core::{EventId, QueueStore};
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryQueueStore::new();
//! let category = CategoryBuilder::new(EventId::new()).total(1).build();
//! store.insert_category(category.clone()).await?;
//!
//! let entry = store.enqueue(new_entry(&category, "alice", 1)).await?;
//! assert_eq!(entry.position, 1);
//! assert_eq!(store.available(category.id).await?, 1);
//! # Ok::<(), ticket_queue_core::QueueError>(())
//! # });
//! ```

use chrono::{DateTime, Utc};
use ticket_queue_core::environment::Clock;

mod in_memory;

pub use in_memory::InMemoryQueueStore;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ticket_queue_testing::mocks::FixedClock;
    /// use ticket_queue_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Used to walk offers past their deadline without sleeping.
    #[derive(Debug)]
    pub struct ManualClock {
        millis: AtomicI64,
    }

    impl ManualClock {
        /// Create a clock starting at `start`
        #[must_use]
        pub fn new(start: DateTime<Utc>) -> Self {
            Self {
                millis: AtomicI64::new(start.timestamp_millis()),
            }
        }

        /// Move the clock forward (or backward, for negative durations)
        pub fn advance(&self, by: Duration) {
            self.millis.fetch_add(by.num_milliseconds(), Ordering::SeqCst);
        }

        /// Jump to an absolute instant
        pub fn set(&self, to: DateTime<Utc>) {
            self.millis.store(to.timestamp_millis(), Ordering::SeqCst);
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(test_clock().now())
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_default(),
        )
    }
}

/// Builders for test data
pub mod fixtures {
    use super::mocks::test_clock;
    use super::Clock;
    use ticket_queue_core::{
        CategoryId, EventId, Money, NewQueueEntry, RequesterId, SaleWindow, TicketCategory,
    };

    /// Builder for [`TicketCategory`] with test-friendly defaults
    /// (10 tickets at $50, active, always on sale).
    #[derive(Debug, Clone)]
    pub struct CategoryBuilder {
        category: TicketCategory,
    }

    impl CategoryBuilder {
        /// Start a category for `event_id`
        #[must_use]
        pub fn new(event_id: EventId) -> Self {
            Self {
                category: TicketCategory::new(
                    event_id,
                    "General",
                    Money::from_cents(5_000),
                    10,
                    test_clock().now(),
                ),
            }
        }

        /// Set the category ID
        #[must_use]
        pub const fn id(mut self, id: CategoryId) -> Self {
            self.category.id = id;
            self
        }

        /// Set the display name
        #[must_use]
        pub fn name(mut self, name: &str) -> Self {
            self.category.name = name.to_string();
            self
        }

        /// Set the unit price in cents
        #[must_use]
        pub const fn price_cents(mut self, cents: u64) -> Self {
            self.category.price = Money::from_cents(cents);
            self
        }

        /// Set total capacity
        #[must_use]
        pub const fn total(mut self, total: u32) -> Self {
            self.category.total = total;
            self
        }

        /// Set tickets already sold
        #[must_use]
        pub const fn sold(mut self, sold: u32) -> Self {
            self.category.sold = sold;
            self
        }

        /// Set the active flag
        #[must_use]
        pub const fn active(mut self, active: bool) -> Self {
            self.category.active = active;
            self
        }

        /// Set the sale window
        #[must_use]
        pub const fn sale_window(mut self, window: SaleWindow) -> Self {
            self.category.sale_window = window;
            self
        }

        /// Finish
        #[must_use]
        pub fn build(self) -> TicketCategory {
            self.category
        }
    }

    /// A join request for `requester` against `category`
    #[must_use]
    pub fn new_entry(category: &TicketCategory, requester: &str, quantity: u32) -> NewQueueEntry {
        NewQueueEntry {
            event_id: category.event_id,
            category_id: category.id,
            requester: RequesterId::new(requester),
            quantity,
            created_at: test_clock().now(),
        }
    }
}

/// Assertions over stored state
pub mod invariants {
    use ticket_queue_core::{CategoryId, QueueError, QueueStore};

    /// Check both ledger invariants for a category, returning a description of the first
    /// violation.
    ///
    /// - `sold + reserved <= total`
    /// - `reserved == Σ offered_quantity` over offered and purchasing entries
    ///
    /// # Errors
    ///
    /// Returns `Err(description)` on a violation or if the store fails.
    pub async fn check_ledger<S: QueueStore + ?Sized>(
        store: &S,
        category_id: CategoryId,
    ) -> Result<(), String> {
        let category = store
            .load_category(category_id)
            .await
            .map_err(|e: QueueError| e.to_string())?
            .ok_or_else(|| format!("category {category_id} missing"))?;
        let entries = store
            .list_entries(category_id)
            .await
            .map_err(|e| e.to_string())?;

        if category.sold + category.reserved > category.total {
            return Err(format!(
                "over-allocated: sold {} + reserved {} > total {}",
                category.sold, category.reserved, category.total
            ));
        }

        let held: u32 = entries.iter().map(ticket_queue_core::QueueEntry::held_quantity).sum();
        if held != category.reserved {
            return Err(format!(
                "reservation drift: entries hold {held}, ledger reserved {}",
                category.reserved
            ));
        }
        Ok(())
    }

    /// Panicking wrapper around [`check_ledger`] for tests.
    ///
    /// # Panics
    ///
    /// Panics if an invariant is violated.
    #[allow(clippy::panic)]
    pub async fn assert_ledger_consistent<S: QueueStore + ?Sized>(store: &S, category_id: CategoryId) {
        if let Err(violation) = check_ledger(store, category_id).await {
            panic!("ledger invariant violated for {category_id}: {violation}");
        }
    }
}

// Re-export commonly used items
pub use fixtures::{CategoryBuilder, new_entry};
pub use invariants::{assert_ledger_consistent, check_ledger};
pub use mocks::{FixedClock, ManualClock, test_clock};

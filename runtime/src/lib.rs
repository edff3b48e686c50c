//! # Ticket Queue Runtime
//!
//! The offer queue engine. When a ticket category sells out, buyers join a FIFO queue per
//! category; whenever tickets free up, the earliest waiting buyers receive time-limited
//! offers that reserve the tickets for them until they accept, decline, or let the offer
//! lapse.
//!
//! ## Components
//!
//! - [`InventoryLedger`]: capacity, sold and reserved counts, changed only atomically
//! - [`QueueBook`]: ordered entries, ranks, guarded status transitions
//! - [`OfferScheduler`]: promotion, expiry and the sweep pass
//! - [`TicketQueue`]: the command/query surface used by checkout and UI code
//! - [`Sweeper`]: background task running the sweep on an interval
//!
//! Persistence lives behind [`QueueStore`](ticket_queue_core::QueueStore); see the
//! `ticket-queue-postgres` crate for the production store and `ticket-queue-testing` for the
//! in-memory one.
//!
//! ## Example
//!
//! ```ignore
//! let queue = TicketQueue::new(store, Arc::new(SystemClock), QueueConfig::default())?;
//! let joined = queue.join_queue(event_id, category_id, requester.clone(), 2).await?;
//! if joined.entry.status == EntryStatus::Offered {
//!     let handle = queue.accept_offer(joined.entry.id, &requester).await?;
//!     // take payment for handle.total, then
//!     queue.complete_purchase(handle.entry_id).await?;
//! }
//! ```

/// Engine configuration and fulfilment policy
pub mod config;

/// Command/query surface
pub mod facade;

/// Inventory ledger
pub mod ledger;

/// Prometheus metrics for observability
pub mod metrics;

/// Queue book
pub mod queue;

/// Retry logic with exponential backoff
pub mod retry;

/// Offer scheduler
pub mod scheduler;

/// Background sweep task
pub mod sweeper;

pub use config::{ConfigError, FulfillmentPolicy, QueueConfig};
pub use facade::{Availability, JoinOutcome, PositionView, PurchaseHandle, TicketQueue};
pub use ledger::InventoryLedger;
pub use queue::{QueueBook, QueueRank};
pub use retry::RetryPolicy;
pub use scheduler::{OfferScheduler, SweepReport};
pub use sweeper::Sweeper;

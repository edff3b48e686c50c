//! # Ticket Queue Core
//!
//! Core types and traits for the ticket offer queue.
//!
//! The offer queue rations scarce ticket inventory across concurrently arriving demand:
//! requesters join a per-category queue, the earliest waiting entries are converted into
//! time-boxed purchase offers backed by a reservation, and lapsed offers release their
//! inventory to the next in line.
//!
//! ## Core Concepts
//!
//! - **Ticket category**: inventory unit with `total`, `sold` and `reserved` counts
//! - **Queue entry**: one party's request for N tickets of a category
//! - **Offer**: a time-boxed right to purchase a reserved quantity
//! - **Transition**: a compare-and-swap on entry status paired with its ledger effect
//! - **Store**: transactional persistence, injected as `Arc<dyn QueueStore>`
//!
//! ## Invariants
//!
//! For every category at all times:
//!
//! ```text
//! sold + reserved <= total
//! reserved == Σ offered_quantity of entries in {offered, purchasing}
//! ```
//!
//! The second holds by construction: [`Transition`] is the only way the engine changes an
//! entry's status, and it always carries the matching [`LedgerEffect`].

pub mod error;
pub mod store;
pub mod types;

pub use error::QueueError;
pub use store::{QueueStore, StoreFuture};
pub use types::*;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};

/// Environment module - Dependency injection traits
///
/// All time-dependent behaviour (offer deadlines, lazy expiry, sweeps) reads the current
/// instant through [`Clock`](environment::Clock) so tests can control it.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use ticket_queue_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

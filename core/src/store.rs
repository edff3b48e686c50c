//! Persistent store port for categories and queue entries.
//!
//! The engine never holds in-process locks around shared state: requests may be served by
//! independent processes. Instead every method on [`QueueStore`] is a single atomic unit
//! against the backing store, and all ledger counters change only through
//! [`QueueStore::reserve`], [`QueueStore::release`], [`QueueStore::commit_sale`], or
//! the ledger effect carried by a [`Transition`].
//!
//! # Implementations
//!
//! - `PostgresQueueStore` (in `ticket-queue-postgres`): production implementation
//! - `InMemoryQueueStore` (in `ticket-queue-testing`): fast, deterministic testing
//!
//! # Dyn Compatibility
//!
//! Methods return boxed futures instead of using `async fn` so the engine can hold an
//! `Arc<dyn QueueStore>`.

use crate::error::QueueError;
use crate::types::{
    CategoryId, EntryId, NewQueueEntry, QueueEntry, RequesterId, TicketCategory, Transition,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, QueueError>> + Send + 'a>>;

/// Transactional storage for ticket categories and queue entries.
///
/// Required indexes (or their equivalent): entries by category ordered by position, and the
/// active entry by `(requester, category)`.
pub trait QueueStore: Send + Sync {
    /// Insert a newly configured category.
    ///
    /// # Errors
    ///
    /// - `Validation`: a category with the same ID exists, or `sold + reserved > total`
    /// - `StoreUnavailable`: the store failed
    fn insert_category(&self, category: TicketCategory) -> StoreFuture<'_, ()>;

    /// Load a category with its current ledger counts.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    fn load_category(&self, category_id: CategoryId) -> StoreFuture<'_, Option<TicketCategory>>;

    /// `max(0, total - sold - reserved)` for a category.
    ///
    /// # Errors
    ///
    /// - `CategoryNotFound`: unknown category
    /// - `StoreUnavailable`: the store failed
    fn available(&self, category_id: CategoryId) -> StoreFuture<'_, u32>;

    /// Atomically increment `reserved` if at least `quantity` is available.
    ///
    /// # Errors
    ///
    /// - `InsufficientInventory`: not enough available; nothing changed
    /// - `CategoryNotFound`: unknown category
    /// - `StoreUnavailable`: the store failed
    fn reserve(&self, category_id: CategoryId, quantity: u32) -> StoreFuture<'_, ()>;

    /// Decrement `reserved` by `quantity`, floored at zero.
    ///
    /// # Errors
    ///
    /// - `CategoryNotFound`: unknown category
    /// - `StoreUnavailable`: the store failed
    fn release(&self, category_id: CategoryId, quantity: u32) -> StoreFuture<'_, ()>;

    /// Atomically move `quantity` from `reserved` to `sold`.
    ///
    /// # Errors
    ///
    /// - `InsufficientInventory`: `sold + quantity` would exceed `total`
    /// - `CategoryNotFound`: unknown category
    /// - `StoreUnavailable`: the store failed
    fn commit_sale(&self, category_id: CategoryId, quantity: u32) -> StoreFuture<'_, ()>;

    /// Insert a waiting entry at `max(position) + 1` for its category.
    ///
    /// # Errors
    ///
    /// - `DuplicateRequest`: the requester already has a non-terminal entry for the category
    /// - `CategoryNotFound`: unknown category
    /// - `StoreUnavailable`: the store failed
    fn enqueue(&self, entry: NewQueueEntry) -> StoreFuture<'_, QueueEntry>;

    /// Load an entry by ID.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    fn load_entry(&self, entry_id: EntryId) -> StoreFuture<'_, Option<QueueEntry>>;

    /// The requester's non-terminal entry for a category, if any.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    fn find_active<'a>(
        &'a self,
        requester: &'a RequesterId,
        category_id: CategoryId,
    ) -> StoreFuture<'a, Option<QueueEntry>>;

    /// The requester's most recent entry for a category, terminal or not.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    fn find_latest<'a>(
        &'a self,
        requester: &'a RequesterId,
        category_id: CategoryId,
    ) -> StoreFuture<'a, Option<QueueEntry>>;

    /// Waiting entries of a category ordered by position ascending. Read-only.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    fn list_waiting(&self, category_id: CategoryId) -> StoreFuture<'_, Vec<QueueEntry>>;

    /// Every entry of a category, terminal ones included, ordered by position.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    fn list_entries(&self, category_id: CategoryId) -> StoreFuture<'_, Vec<QueueEntry>>;

    /// Apply a guarded status change and its ledger effect in one transaction.
    ///
    /// Returns the updated entry.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: the entry's status is not `transition.from()`
    /// - `InsufficientInventory`: a `Reserve` effect could not be satisfied
    /// - `EntryNotFound`: unknown entry
    /// - `StoreUnavailable`: the store failed
    ///
    /// On any error neither the entry nor the ledger changes.
    fn transition(&self, transition: Transition) -> StoreFuture<'_, QueueEntry>;

    /// Offered entries whose deadline is strictly before `now`, oldest deadline first.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    fn list_expired_offers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<QueueEntry>>;

    /// Categories that currently have at least one waiting entry.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    fn categories_with_waiting(&self) -> StoreFuture<'_, Vec<CategoryId>>;
}

//! Error taxonomy for queue operations.
//!
//! Every variant except [`QueueError::StoreUnavailable`] is a recoverable,
//! caller-visible condition that the UI layer translates into a message.
//! `StoreUnavailable` is the transient class: the invoking request handler may retry.

use crate::types::{CategoryId, EntryId, EntryStatus, RequesterId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during queue, ledger and store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The requester already has an active entry for this category.
    #[error("Requester {requester} already has active entry {existing} for category {category_id}")]
    DuplicateRequest {
        /// Who asked
        requester: RequesterId,
        /// Category joined
        category_id: CategoryId,
        /// The entry that is already active
        existing: EntryId,
    },

    /// A reservation asked for more than the category has available.
    #[error("Insufficient inventory in category {category_id}: requested {requested}, available {available}")]
    InsufficientInventory {
        /// Category
        category_id: CategoryId,
        /// Quantity asked for
        requested: u32,
        /// Quantity that was available at the time
        available: u32,
    },

    /// Compare-and-swap mismatch: the entry was modified concurrently.
    #[error("Invalid transition for entry {entry_id}: expected {expected}, found {actual}")]
    InvalidTransition {
        /// Entry
        entry_id: EntryId,
        /// Status the caller expected
        expected: EntryStatus,
        /// Status actually stored
        actual: EntryStatus,
    },

    /// The offer lapsed before the action; the requester should rejoin.
    #[error("Offer for entry {entry_id} expired at {expired_at}, please rejoin the queue")]
    OfferExpired {
        /// Entry
        entry_id: EntryId,
        /// Offer deadline
        expired_at: DateTime<Utc>,
    },

    /// Unknown entry.
    #[error("Queue entry not found: {0}")]
    EntryNotFound(EntryId),

    /// Unknown category.
    #[error("Ticket category not found: {0}")]
    CategoryNotFound(CategoryId),

    /// The requester does not own the entry.
    #[error("Requester {requester} does not own entry {entry_id}")]
    Unauthorized {
        /// Entry
        entry_id: EntryId,
        /// Who asked
        requester: RequesterId,
    },

    /// Request failed validation (bad quantity, mismatched event, ...).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The category is inactive or outside its sale window.
    #[error("Sales are closed for category {0}")]
    SalesClosed(CategoryId),

    /// The persistent store could not be reached or failed mid-transaction.
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),
}

impl QueueError {
    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::StoreUnavailable(_))
    }

    /// Whether the user-facing message should suggest rejoining the queue.
    #[must_use]
    pub const fn should_rejoin(&self) -> bool {
        matches!(self, Self::OfferExpired { .. })
    }

    /// Stable machine-readable code for the UI layer.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DuplicateRequest { .. } => "DUPLICATE_REQUEST",
            Self::InsufficientInventory { .. } => "INSUFFICIENT_INVENTORY",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::OfferExpired { .. } => "OFFER_EXPIRED",
            Self::EntryNotFound(_) | Self::CategoryNotFound(_) => "NOT_FOUND",
            Self::Unauthorized { .. } => "UNAUTHORIZED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::SalesClosed(_) => "SALES_CLOSED",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

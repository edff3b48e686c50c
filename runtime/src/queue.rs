//! Queue book: ordered retrieval and guarded transitions of queue entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use ticket_queue_core::{
    CategoryId, EntryId, EntryStatus, EventId, NewQueueEntry, QueueEntry, QueueError, QueueStore,
    RequesterId, Transition,
};

/// Where a waiting entry stands among the other waiting entries of its category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueRank {
    /// 1-based rank among waiting entries
    pub rank: usize,
    /// Waiting entries ahead of this one
    pub entries_ahead: usize,
    /// Tickets requested by the entries ahead
    pub tickets_ahead: u64,
}

/// Queue entry operations over a [`QueueStore`].
#[derive(Clone)]
pub struct QueueBook {
    store: Arc<dyn QueueStore>,
}

impl QueueBook {
    /// Create a queue book over `store`
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Append a waiting entry at the back of the category's queue.
    ///
    /// # Errors
    ///
    /// - `DuplicateRequest`: the requester already has an active entry
    /// - `CategoryNotFound`, `StoreUnavailable`
    pub async fn enqueue(
        &self,
        event_id: EventId,
        category_id: CategoryId,
        requester: RequesterId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<QueueEntry, QueueError> {
        let entry = self
            .store
            .enqueue(NewQueueEntry {
                event_id,
                category_id,
                requester,
                quantity,
                created_at: now,
            })
            .await?;
        tracing::info!(
            entry_id = %entry.id,
            category_id = %category_id,
            requester = %entry.requester,
            quantity,
            position = entry.position,
            "Joined queue"
        );
        Ok(entry)
    }

    /// Waiting entries in FIFO order. Read-only.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    pub async fn list_waiting(&self, category_id: CategoryId) -> Result<Vec<QueueEntry>, QueueError> {
        self.store.list_waiting(category_id).await
    }

    /// The earliest waiting entry, if any.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    pub async fn head(&self, category_id: CategoryId) -> Result<Option<QueueEntry>, QueueError> {
        Ok(self.store.list_waiting(category_id).await?.into_iter().next())
    }

    /// The requester's active entry for a category, if any.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    pub async fn get_by_requester(
        &self,
        requester: &RequesterId,
        category_id: CategoryId,
    ) -> Result<Option<QueueEntry>, QueueError> {
        self.store.find_active(requester, category_id).await
    }

    /// The requester's most recent entry for a category, including terminal ones.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    pub async fn latest_for_requester(
        &self,
        requester: &RequesterId,
        category_id: CategoryId,
    ) -> Result<Option<QueueEntry>, QueueError> {
        self.store.find_latest(requester, category_id).await
    }

    /// Load an entry or fail with `EntryNotFound`.
    ///
    /// # Errors
    ///
    /// - `EntryNotFound`: unknown entry
    /// - `StoreUnavailable`: the store failed
    pub async fn get(&self, entry_id: EntryId) -> Result<QueueEntry, QueueError> {
        self.store
            .load_entry(entry_id)
            .await?
            .ok_or(QueueError::EntryNotFound(entry_id))
    }

    /// Compare-and-swap the entry's status, applying the paired ledger effect.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition`: the entry's status is no longer `transition.from()`
    /// - `InsufficientInventory`: a reservation could not be made
    /// - `EntryNotFound`, `StoreUnavailable`
    pub async fn transition(&self, transition: Transition) -> Result<QueueEntry, QueueError> {
        debug_assert!(transition.from().can_transition_to(transition.to()));
        self.store.transition(transition).await
    }

    /// Rank of a waiting entry, or `None` if it is not waiting.
    ///
    /// # Errors
    ///
    /// - `StoreUnavailable`: the store failed
    pub async fn rank_of(&self, entry: &QueueEntry) -> Result<Option<QueueRank>, QueueError> {
        if entry.status != EntryStatus::Waiting {
            return Ok(None);
        }
        let waiting = self.store.list_waiting(entry.category_id).await?;
        Ok(rank_in(&waiting, entry.id))
    }
}

/// Rank of `entry_id` within an already-ordered waiting list.
fn rank_in(waiting: &[QueueEntry], entry_id: EntryId) -> Option<QueueRank> {
    let index = waiting.iter().position(|e| e.id == entry_id)?;
    let tickets_ahead = waiting[..index]
        .iter()
        .map(|e| u64::from(e.requested_quantity))
        .sum();
    Some(QueueRank {
        rank: index + 1,
        entries_ahead: index,
        tickets_ahead,
    })
}

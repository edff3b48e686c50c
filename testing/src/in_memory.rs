//! In-memory implementation of [`QueueStore`].
//!
//! All state lives behind a single async mutex that is held for the whole of every
//! operation, so each call is one atomic unit exactly like a store transaction. The store
//! can be switched "offline" to exercise transient-failure paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use ticket_queue_core::{
    CategoryId, EntryId, EntryStatus, LedgerEffect, NewQueueEntry, QueueEntry, QueueError,
    QueueStore, RequesterId, StoreFuture, TicketCategory, Transition,
};
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct State {
    categories: HashMap<CategoryId, TicketCategory>,
    entries: HashMap<EntryId, QueueEntry>,
    last_position: HashMap<CategoryId, u64>,
}

impl State {
    fn category_mut(&mut self, category_id: CategoryId) -> Result<&mut TicketCategory, QueueError> {
        self.categories
            .get_mut(&category_id)
            .ok_or(QueueError::CategoryNotFound(category_id))
    }

    fn sorted(&self, filter: impl Fn(&QueueEntry) -> bool) -> Vec<QueueEntry> {
        let mut entries: Vec<QueueEntry> =
            self.entries.values().filter(|e| filter(*e)).cloned().collect();
        entries.sort_by_key(|e| (e.category_id, e.position));
        entries
    }
}

/// Checks `quantity` against a category's availability and reserves it.
fn reserve_in(category: &mut TicketCategory, quantity: u32) -> Result<(), QueueError> {
    if !category.can_reserve(quantity) {
        return Err(QueueError::InsufficientInventory {
            category_id: category.id,
            requested: quantity,
            available: category.available(),
        });
    }
    category.reserved += quantity;
    Ok(())
}

fn release_in(category: &mut TicketCategory, quantity: u32) {
    category.reserved = category.reserved.saturating_sub(quantity);
}

fn commit_in(category: &mut TicketCategory, quantity: u32) -> Result<(), QueueError> {
    let sold = category.sold.saturating_add(quantity);
    let reserved = category.reserved.saturating_sub(quantity);
    if sold.saturating_add(reserved) > category.total {
        return Err(QueueError::InsufficientInventory {
            category_id: category.id,
            requested: quantity,
            available: category.available(),
        });
    }
    category.sold = sold;
    category.reserved = reserved;
    Ok(())
}

/// Deterministic, process-local [`QueueStore`] for tests and demos.
///
/// # Example
///
/// ```
/// use ticket_queue_testing::InMemoryQueueStore;
/// use ticket_queue_core::QueueStore;
/// use std::sync::Arc;
///
/// let store: Arc<dyn QueueStore> = Arc::new(InMemoryQueueStore::new());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    state: Mutex<State>,
    offline: AtomicBool,
    transitions: AtomicUsize,
}

impl InMemoryQueueStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `StoreUnavailable` (or recover).
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of transitions that committed
    #[must_use]
    pub fn committed_transitions(&self) -> usize {
        self.transitions.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), QueueError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(QueueError::StoreUnavailable(
                "in-memory store is offline".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

impl QueueStore for InMemoryQueueStore {
    fn insert_category(&self, category: TicketCategory) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check_online()?;
            if category.sold.saturating_add(category.reserved) > category.total {
                return Err(QueueError::Validation(format!(
                    "Category {} has sold + reserved above total",
                    category.id
                )));
            }
            let mut state = self.state.lock().await;
            if state.categories.contains_key(&category.id) {
                return Err(QueueError::Validation(format!(
                    "Category {} already exists",
                    category.id
                )));
            }
            state.categories.insert(category.id, category);
            Ok(())
        })
    }

    fn load_category(&self, category_id: CategoryId) -> StoreFuture<'_, Option<TicketCategory>> {
        Box::pin(async move {
            self.check_online()?;
            let state = self.state.lock().await;
            Ok(state.categories.get(&category_id).cloned())
        })
    }

    fn available(&self, category_id: CategoryId) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            self.check_online()?;
            let state = self.state.lock().await;
            state
                .categories
                .get(&category_id)
                .map(TicketCategory::available)
                .ok_or(QueueError::CategoryNotFound(category_id))
        })
    }

    fn reserve(&self, category_id: CategoryId, quantity: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check_online()?;
            let mut state = self.state.lock().await;
            reserve_in(state.category_mut(category_id)?, quantity)
        })
    }

    fn release(&self, category_id: CategoryId, quantity: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check_online()?;
            let mut state = self.state.lock().await;
            release_in(state.category_mut(category_id)?, quantity);
            Ok(())
        })
    }

    fn commit_sale(&self, category_id: CategoryId, quantity: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.check_online()?;
            let mut state = self.state.lock().await;
            commit_in(state.category_mut(category_id)?, quantity)
        })
    }

    fn enqueue(&self, entry: NewQueueEntry) -> StoreFuture<'_, QueueEntry> {
        Box::pin(async move {
            self.check_online()?;
            let mut state = self.state.lock().await;
            if !state.categories.contains_key(&entry.category_id) {
                return Err(QueueError::CategoryNotFound(entry.category_id));
            }
            if let Some(existing) = state.entries.values().find(|e| {
                e.category_id == entry.category_id
                    && e.requester == entry.requester
                    && !e.status.is_terminal()
            }) {
                return Err(QueueError::DuplicateRequest {
                    requester: entry.requester,
                    category_id: entry.category_id,
                    existing: existing.id,
                });
            }

            let position = state
                .last_position
                .get(&entry.category_id)
                .copied()
                .unwrap_or(0)
                + 1;
            state.last_position.insert(entry.category_id, position);

            let created = QueueEntry {
                id: EntryId::new(),
                event_id: entry.event_id,
                category_id: entry.category_id,
                requester: entry.requester,
                requested_quantity: entry.quantity,
                offered_quantity: 0,
                status: EntryStatus::Waiting,
                position,
                offer_expires_at: None,
                created_at: entry.created_at,
                updated_at: entry.created_at,
            };
            state.entries.insert(created.id, created.clone());
            Ok(created)
        })
    }

    fn load_entry(&self, entry_id: EntryId) -> StoreFuture<'_, Option<QueueEntry>> {
        Box::pin(async move {
            self.check_online()?;
            let state = self.state.lock().await;
            Ok(state.entries.get(&entry_id).cloned())
        })
    }

    fn find_active<'a>(
        &'a self,
        requester: &'a RequesterId,
        category_id: CategoryId,
    ) -> StoreFuture<'a, Option<QueueEntry>> {
        Box::pin(async move {
            self.check_online()?;
            let state = self.state.lock().await;
            Ok(state
                .entries
                .values()
                .find(|e| {
                    e.category_id == category_id
                        && e.requester == *requester
                        && !e.status.is_terminal()
                })
                .cloned())
        })
    }

    fn find_latest<'a>(
        &'a self,
        requester: &'a RequesterId,
        category_id: CategoryId,
    ) -> StoreFuture<'a, Option<QueueEntry>> {
        Box::pin(async move {
            self.check_online()?;
            let state = self.state.lock().await;
            Ok(state
                .entries
                .values()
                .filter(|e| e.category_id == category_id && e.requester == *requester)
                .max_by_key(|e| e.position)
                .cloned())
        })
    }

    fn list_waiting(&self, category_id: CategoryId) -> StoreFuture<'_, Vec<QueueEntry>> {
        Box::pin(async move {
            self.check_online()?;
            let state = self.state.lock().await;
            Ok(state.sorted(|e| e.category_id == category_id && e.status == EntryStatus::Waiting))
        })
    }

    fn list_entries(&self, category_id: CategoryId) -> StoreFuture<'_, Vec<QueueEntry>> {
        Box::pin(async move {
            self.check_online()?;
            let state = self.state.lock().await;
            Ok(state.sorted(|e| e.category_id == category_id))
        })
    }

    fn transition(&self, transition: Transition) -> StoreFuture<'_, QueueEntry> {
        Box::pin(async move {
            self.check_online()?;
            let mut guard = self.state.lock().await;
            let state = &mut *guard;

            let entry_id = transition.entry_id();
            let entry = state
                .entries
                .get(&entry_id)
                .ok_or(QueueError::EntryNotFound(entry_id))?;
            if entry.status != transition.from() {
                return Err(QueueError::InvalidTransition {
                    entry_id,
                    expected: transition.from(),
                    actual: entry.status,
                });
            }
            let category_id = entry.category_id;

            // Ledger first: if it refuses, the entry is left untouched.
            let category = state.category_mut(category_id)?;
            match transition.ledger() {
                LedgerEffect::None => {}
                LedgerEffect::Reserve(quantity) => reserve_in(category, quantity)?,
                LedgerEffect::Release(quantity) => release_in(category, quantity),
                LedgerEffect::CommitSale(quantity) => commit_in(category, quantity)?,
            }

            let entry = state
                .entries
                .get_mut(&entry_id)
                .ok_or(QueueError::EntryNotFound(entry_id))?;
            transition.apply_to(entry);
            self.transitions.fetch_add(1, Ordering::SeqCst);
            Ok(entry.clone())
        })
    }

    fn list_expired_offers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<QueueEntry>> {
        Box::pin(async move {
            self.check_online()?;
            let state = self.state.lock().await;
            let mut expired = state.sorted(|e| e.is_offer_lapsed(now));
            expired.sort_by_key(|e| e.offer_expires_at);
            expired.truncate(limit);
            Ok(expired)
        })
    }

    fn categories_with_waiting(&self) -> StoreFuture<'_, Vec<CategoryId>> {
        Box::pin(async move {
            self.check_online()?;
            let state = self.state.lock().await;
            let mut ids: Vec<CategoryId> = state
                .entries
                .values()
                .filter(|e| e.status == EntryStatus::Waiting)
                .map(|e| e.category_id)
                .collect();
            ids.sort();
            ids.dedup();
            Ok(ids)
        })
    }
}

//! Inventory ledger: the authoritative count of capacity, sold and reserved tickets.
//!
//! Every mutation is a single store-level atomic operation. Nothing here reads a count and
//! writes it back in a second call.

use std::sync::Arc;
use ticket_queue_core::{CategoryId, QueueError, QueueStore, TicketCategory};

/// Ledger operations over a [`QueueStore`].
#[derive(Clone)]
pub struct InventoryLedger {
    store: Arc<dyn QueueStore>,
}

impl InventoryLedger {
    /// Create a ledger over `store`
    #[must_use]
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Load a category or fail with `CategoryNotFound`.
    ///
    /// # Errors
    ///
    /// - `CategoryNotFound`: unknown category
    /// - `StoreUnavailable`: the store failed
    pub async fn category(&self, category_id: CategoryId) -> Result<TicketCategory, QueueError> {
        self.store
            .load_category(category_id)
            .await?
            .ok_or(QueueError::CategoryNotFound(category_id))
    }

    /// `max(0, total - sold - reserved)`.
    ///
    /// # Errors
    ///
    /// - `CategoryNotFound`: unknown category
    /// - `StoreUnavailable`: the store failed
    pub async fn available(&self, category_id: CategoryId) -> Result<u32, QueueError> {
        self.store.available(category_id).await
    }

    /// Reserve `quantity` if that many are available; no side effects otherwise.
    ///
    /// # Errors
    ///
    /// - `Validation`: zero quantity
    /// - `InsufficientInventory`: not enough available
    /// - `CategoryNotFound`, `StoreUnavailable`
    pub async fn reserve(&self, category_id: CategoryId, quantity: u32) -> Result<(), QueueError> {
        ensure_positive(quantity)?;
        self.store.reserve(category_id, quantity).await?;
        tracing::debug!(category_id = %category_id, quantity, "Inventory reserved");
        Ok(())
    }

    /// Release `quantity` reserved tickets, floored at zero.
    ///
    /// Callers must only release a reservation they know is still held (for entries, the
    /// status compare-and-swap in a transition guarantees that).
    ///
    /// # Errors
    ///
    /// - `CategoryNotFound`, `StoreUnavailable`
    pub async fn release(&self, category_id: CategoryId, quantity: u32) -> Result<(), QueueError> {
        if quantity == 0 {
            return Ok(());
        }
        self.store.release(category_id, quantity).await?;
        tracing::debug!(category_id = %category_id, quantity, "Inventory released");
        Ok(())
    }

    /// Move `quantity` from reserved to sold in one step.
    ///
    /// # Errors
    ///
    /// - `Validation`: zero quantity
    /// - `InsufficientInventory`: would exceed capacity
    /// - `CategoryNotFound`, `StoreUnavailable`
    pub async fn commit_sale(
        &self,
        category_id: CategoryId,
        quantity: u32,
    ) -> Result<(), QueueError> {
        ensure_positive(quantity)?;
        self.store.commit_sale(category_id, quantity).await?;
        tracing::debug!(category_id = %category_id, quantity, "Sale committed");
        Ok(())
    }
}

fn ensure_positive(quantity: u32) -> Result<(), QueueError> {
    if quantity == 0 {
        Err(QueueError::Validation(
            "Quantity must be greater than zero".to_string(),
        ))
    } else {
        Ok(())
    }
}

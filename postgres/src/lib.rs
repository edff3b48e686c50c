//! `PostgreSQL` queue store for the ticket offer queue.
//!
//! This crate provides [`PostgresQueueStore`], the production implementation of the
//! `QueueStore` trait from `ticket-queue-core`. Every trait method is a single SQL
//! statement or a single transaction:
//!
//! - `reserve` is one conditional `UPDATE` guarded by `total - sold - reserved >= q`
//! - `transition` locks the entry row, applies the ledger effect and the status change,
//!   and commits both or neither
//! - `enqueue` locks the category row to assign `max(position) + 1`
//!
//! The table-level `CHECK (sold + reserved <= total)` and the partial unique index on
//! active `(requester, category_id)` back these guards in the schema itself.
//!
//! # Example
//!
//! ```ignore
//! use ticket_queue_postgres::PostgresQueueStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresQueueStore::new("postgres://localhost/tickets").await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod rows;

use chrono::{DateTime, Utc};
use rows::{CATEGORY_COLUMNS, CategoryRow, ENTRY_COLUMNS, EntryRow, to_i32};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::PgConnection;
use ticket_queue_core::{
    CategoryId, EntryId, EntryStatus, LedgerEffect, NewQueueEntry, QueueEntry, QueueError,
    QueueStore, RequesterId, StoreFuture, TicketCategory, Transition,
};
use uuid::Uuid;

/// Statuses that count as "active" for the duplicate-join rule, as a SQL list.
const ACTIVE_STATUSES: &str = "('waiting', 'offered', 'purchasing')";

fn db_err(e: sqlx::Error) -> QueueError {
    QueueError::StoreUnavailable(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// `PostgreSQL`-backed [`QueueStore`].
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct PostgresQueueStore {
    pool: PgPool,
}

impl PostgresQueueStore {
    /// Connect to `database_url` with a default pool.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if the connection fails.
    pub async fn new(database_url: &str) -> Result<Self, QueueError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| QueueError::StoreUnavailable(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::StoreUnavailable`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), QueueError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| QueueError::StoreUnavailable(format!("Migration failed: {e}")))
    }

    /// Get the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

// ============================================================================
// Ledger statements, shared by the standalone ledger ops and `transition`
// ============================================================================

async fn available_on(
    conn: &mut PgConnection,
    category_id: CategoryId,
) -> Result<Option<u32>, QueueError> {
    let row: Option<(i32,)> = sqlx::query_as(
        "SELECT GREATEST(total - sold - reserved, 0) FROM ticket_categories WHERE id = $1",
    )
    .bind(*category_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)?;
    Ok(row.map(|(available,)| u32::try_from(available).unwrap_or(0)))
}

/// Turns a zero-row ledger update into the right error.
async fn refused(
    conn: &mut PgConnection,
    category_id: CategoryId,
    requested: u32,
) -> QueueError {
    match available_on(conn, category_id).await {
        Ok(Some(available)) => QueueError::InsufficientInventory {
            category_id,
            requested,
            available,
        },
        Ok(None) => QueueError::CategoryNotFound(category_id),
        Err(e) => e,
    }
}

async fn reserve_on(
    conn: &mut PgConnection,
    category_id: CategoryId,
    quantity: u32,
) -> Result<(), QueueError> {
    let result = sqlx::query(
        "UPDATE ticket_categories SET reserved = reserved + $2 \
         WHERE id = $1 AND total - sold - reserved >= $2",
    )
    .bind(*category_id.as_uuid())
    .bind(to_i32(quantity)?)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(refused(conn, category_id, quantity).await)
    }
}

async fn release_on(
    conn: &mut PgConnection,
    category_id: CategoryId,
    quantity: u32,
) -> Result<(), QueueError> {
    let result = sqlx::query(
        "UPDATE ticket_categories SET reserved = GREATEST(reserved - $2, 0) WHERE id = $1",
    )
    .bind(*category_id.as_uuid())
    .bind(to_i32(quantity)?)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(QueueError::CategoryNotFound(category_id))
    }
}

async fn commit_sale_on(
    conn: &mut PgConnection,
    category_id: CategoryId,
    quantity: u32,
) -> Result<(), QueueError> {
    let result = sqlx::query(
        "UPDATE ticket_categories \
         SET sold = sold + $2, reserved = GREATEST(reserved - $2, 0) \
         WHERE id = $1 AND sold + $2 + GREATEST(reserved - $2, 0) <= total",
    )
    .bind(*category_id.as_uuid())
    .bind(to_i32(quantity)?)
    .execute(&mut *conn)
    .await
    .map_err(db_err)?;

    if result.rows_affected() == 1 {
        Ok(())
    } else {
        Err(refused(conn, category_id, quantity).await)
    }
}

impl QueueStore for PostgresQueueStore {
    fn insert_category(&self, category: TicketCategory) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            if category.sold.saturating_add(category.reserved) > category.total {
                return Err(QueueError::Validation(format!(
                    "Category {} has sold + reserved above total",
                    category.id
                )));
            }
            let price = i64::try_from(category.price.cents()).map_err(|_| {
                QueueError::Validation(format!("Price {} is out of range", category.price))
            })?;

            let result = sqlx::query(
                "INSERT INTO ticket_categories \
                 (id, event_id, name, price_cents, total, sold, reserved, active, \
                  sale_opens_at, sale_closes_at, created_at) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(*category.id.as_uuid())
            .bind(*category.event_id.as_uuid())
            .bind(&category.name)
            .bind(price)
            .bind(to_i32(category.total)?)
            .bind(to_i32(category.sold)?)
            .bind(to_i32(category.reserved)?)
            .bind(category.active)
            .bind(category.sale_window.opens_at)
            .bind(category.sale_window.closes_at)
            .bind(category.created_at)
            .execute(&self.pool)
            .await;

            match result {
                Ok(_) => Ok(()),
                Err(e) if is_unique_violation(&e) => Err(QueueError::Validation(format!(
                    "Category {} already exists",
                    category.id
                ))),
                Err(e) => Err(db_err(e)),
            }
        })
    }

    fn load_category(&self, category_id: CategoryId) -> StoreFuture<'_, Option<TicketCategory>> {
        Box::pin(async move {
            let sql = format!("SELECT {CATEGORY_COLUMNS} FROM ticket_categories WHERE id = $1");
            let row: Option<CategoryRow> = sqlx::query_as(&sql)
                .bind(*category_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            row.map(TicketCategory::try_from).transpose()
        })
    }

    fn available(&self, category_id: CategoryId) -> StoreFuture<'_, u32> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_err)?;
            available_on(&mut conn, category_id)
                .await?
                .ok_or(QueueError::CategoryNotFound(category_id))
        })
    }

    fn reserve(&self, category_id: CategoryId, quantity: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_err)?;
            reserve_on(&mut conn, category_id, quantity).await
        })
    }

    fn release(&self, category_id: CategoryId, quantity: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_err)?;
            release_on(&mut conn, category_id, quantity).await
        })
    }

    fn commit_sale(&self, category_id: CategoryId, quantity: u32) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            let mut conn = self.pool.acquire().await.map_err(db_err)?;
            commit_sale_on(&mut conn, category_id, quantity).await
        })
    }

    fn enqueue(&self, entry: NewQueueEntry) -> StoreFuture<'_, QueueEntry> {
        Box::pin(async move {
            let mut tx = self.pool.begin().await.map_err(db_err)?;

            // Serializes position assignment per category.
            let locked: Option<(Uuid,)> =
                sqlx::query_as("SELECT id FROM ticket_categories WHERE id = $1 FOR UPDATE")
                    .bind(*entry.category_id.as_uuid())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_err)?;
            if locked.is_none() {
                return Err(QueueError::CategoryNotFound(entry.category_id));
            }

            let existing: Option<(Uuid,)> = sqlx::query_as(&format!(
                "SELECT id FROM queue_entries \
                 WHERE requester = $1 AND category_id = $2 AND status IN {ACTIVE_STATUSES}"
            ))
            .bind(entry.requester.as_str())
            .bind(*entry.category_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
            if let Some((existing,)) = existing {
                return Err(QueueError::DuplicateRequest {
                    requester: entry.requester,
                    category_id: entry.category_id,
                    existing: EntryId::from_uuid(existing),
                });
            }

            let (last_position,): (i64,) = sqlx::query_as(
                "SELECT COALESCE(MAX(position), 0) FROM queue_entries WHERE category_id = $1",
            )
            .bind(*entry.category_id.as_uuid())
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

            let sql = format!(
                "INSERT INTO queue_entries \
                 (id, event_id, category_id, requester, requested_quantity, offered_quantity, \
                  status, position, offer_expires_at, created_at, updated_at) \
                 VALUES ($1, $2, $3, $4, $5, 0, 'waiting', $6, NULL, $7, $7) \
                 RETURNING {ENTRY_COLUMNS}"
            );
            let inserted: Result<EntryRow, sqlx::Error> = sqlx::query_as(&sql)
                .bind(*EntryId::new().as_uuid())
                .bind(*entry.event_id.as_uuid())
                .bind(*entry.category_id.as_uuid())
                .bind(entry.requester.as_str())
                .bind(to_i32(entry.quantity)?)
                .bind(last_position + 1)
                .bind(entry.created_at)
                .fetch_one(&mut *tx)
                .await;

            match inserted {
                Ok(row) => {
                    tx.commit().await.map_err(db_err)?;
                    QueueEntry::try_from(row)
                }
                Err(e) if is_unique_violation(&e) => {
                    drop(tx);
                    tracing::debug!(
                        requester = %entry.requester,
                        category_id = %entry.category_id,
                        "Concurrent join rejected by active-entry index"
                    );
                    let existing = self
                        .find_active(&entry.requester, entry.category_id)
                        .await?
                        .ok_or_else(|| db_err(e))?;
                    Err(QueueError::DuplicateRequest {
                        requester: entry.requester,
                        category_id: entry.category_id,
                        existing: existing.id,
                    })
                }
                Err(e) => Err(db_err(e)),
            }
        })
    }

    fn load_entry(&self, entry_id: EntryId) -> StoreFuture<'_, Option<QueueEntry>> {
        Box::pin(async move {
            let sql = format!("SELECT {ENTRY_COLUMNS} FROM queue_entries WHERE id = $1");
            let row: Option<EntryRow> = sqlx::query_as(&sql)
                .bind(*entry_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            row.map(QueueEntry::try_from).transpose()
        })
    }

    fn find_active<'a>(
        &'a self,
        requester: &'a RequesterId,
        category_id: CategoryId,
    ) -> StoreFuture<'a, Option<QueueEntry>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM queue_entries \
                 WHERE requester = $1 AND category_id = $2 AND status IN {ACTIVE_STATUSES}"
            );
            let row: Option<EntryRow> = sqlx::query_as(&sql)
                .bind(requester.as_str())
                .bind(*category_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            row.map(QueueEntry::try_from).transpose()
        })
    }

    fn find_latest<'a>(
        &'a self,
        requester: &'a RequesterId,
        category_id: CategoryId,
    ) -> StoreFuture<'a, Option<QueueEntry>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM queue_entries \
                 WHERE requester = $1 AND category_id = $2 \
                 ORDER BY position DESC LIMIT 1"
            );
            let row: Option<EntryRow> = sqlx::query_as(&sql)
                .bind(requester.as_str())
                .bind(*category_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
            row.map(QueueEntry::try_from).transpose()
        })
    }

    fn list_waiting(&self, category_id: CategoryId) -> StoreFuture<'_, Vec<QueueEntry>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM queue_entries \
                 WHERE category_id = $1 AND status = 'waiting' ORDER BY position ASC"
            );
            let rows: Vec<EntryRow> = sqlx::query_as(&sql)
                .bind(*category_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            rows.into_iter().map(QueueEntry::try_from).collect()
        })
    }

    fn list_entries(&self, category_id: CategoryId) -> StoreFuture<'_, Vec<QueueEntry>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM queue_entries \
                 WHERE category_id = $1 ORDER BY position ASC"
            );
            let rows: Vec<EntryRow> = sqlx::query_as(&sql)
                .bind(*category_id.as_uuid())
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            rows.into_iter().map(QueueEntry::try_from).collect()
        })
    }

    fn transition(&self, transition: Transition) -> StoreFuture<'_, QueueEntry> {
        Box::pin(async move {
            let entry_id = transition.entry_id();
            let mut tx = self.pool.begin().await.map_err(db_err)?;

            let current: Option<(Uuid, String)> = sqlx::query_as(
                "SELECT category_id, status FROM queue_entries WHERE id = $1 FOR UPDATE",
            )
            .bind(*entry_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;
            let (category_uuid, status) = current.ok_or(QueueError::EntryNotFound(entry_id))?;
            let actual = EntryStatus::parse(&status).ok_or_else(|| {
                QueueError::StoreUnavailable(format!("Invalid entry status: {status}"))
            })?;
            if actual != transition.from() {
                return Err(QueueError::InvalidTransition {
                    entry_id,
                    expected: transition.from(),
                    actual,
                });
            }

            // Dropping `tx` on any error below rolls back the ledger change too.
            let category_id = CategoryId::from_uuid(category_uuid);
            match transition.ledger() {
                LedgerEffect::None => {}
                LedgerEffect::Reserve(quantity) => reserve_on(&mut tx, category_id, quantity).await?,
                LedgerEffect::Release(quantity) => release_on(&mut tx, category_id, quantity).await?,
                LedgerEffect::CommitSale(quantity) => {
                    commit_sale_on(&mut tx, category_id, quantity).await?;
                }
            }

            let sql = format!(
                "UPDATE queue_entries \
                 SET status = $2, \
                     offered_quantity = COALESCE($3, offered_quantity), \
                     offer_expires_at = COALESCE($4, offer_expires_at), \
                     updated_at = $5 \
                 WHERE id = $1 AND status = $6 \
                 RETURNING {ENTRY_COLUMNS}"
            );
            let row: EntryRow = sqlx::query_as(&sql)
                .bind(*entry_id.as_uuid())
                .bind(transition.to().as_str())
                .bind(transition.offered_quantity().map(to_i32).transpose()?)
                .bind(transition.offer_expires_at())
                .bind(transition.at())
                .bind(transition.from().as_str())
                .fetch_one(&mut *tx)
                .await
                .map_err(db_err)?;

            tx.commit().await.map_err(db_err)?;
            QueueEntry::try_from(row)
        })
    }

    fn list_expired_offers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<QueueEntry>> {
        Box::pin(async move {
            let sql = format!(
                "SELECT {ENTRY_COLUMNS} FROM queue_entries \
                 WHERE status = 'offered' AND offer_expires_at < $1 \
                 ORDER BY offer_expires_at ASC LIMIT $2"
            );
            let rows: Vec<EntryRow> = sqlx::query_as(&sql)
                .bind(now)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            rows.into_iter().map(QueueEntry::try_from).collect()
        })
    }

    fn categories_with_waiting(&self) -> StoreFuture<'_, Vec<CategoryId>> {
        Box::pin(async move {
            let rows: Vec<(Uuid,)> = sqlx::query_as(
                "SELECT DISTINCT category_id FROM queue_entries \
                 WHERE status = 'waiting' ORDER BY category_id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
            Ok(rows
                .into_iter()
                .map(|(id,)| CategoryId::from_uuid(id))
                .collect())
        })
    }
}

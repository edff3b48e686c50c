//! Row types and their conversion into domain records.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use ticket_queue_core::{
    CategoryId, EntryId, EntryStatus, EventId, Money, QueueEntry, QueueError, RequesterId,
    SaleWindow, TicketCategory,
};
use uuid::Uuid;

pub(crate) const CATEGORY_COLUMNS: &str = "id, event_id, name, price_cents, total, sold, reserved, \
     active, sale_opens_at, sale_closes_at, created_at";

pub(crate) const ENTRY_COLUMNS: &str = "id, event_id, category_id, requester, requested_quantity, \
     offered_quantity, status, position, offer_expires_at, created_at, updated_at";

#[derive(Debug, FromRow)]
pub(crate) struct CategoryRow {
    id: Uuid,
    event_id: Uuid,
    name: String,
    price_cents: i64,
    total: i32,
    sold: i32,
    reserved: i32,
    active: bool,
    sale_opens_at: Option<DateTime<Utc>>,
    sale_closes_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CategoryRow> for TicketCategory {
    type Error = QueueError;

    fn try_from(row: CategoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: CategoryId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            name: row.name,
            price: Money::from_cents(
                u64::try_from(row.price_cents).map_err(|_| corrupt("price_cents"))?,
            ),
            total: to_u32(row.total, "total")?,
            sold: to_u32(row.sold, "sold")?,
            reserved: to_u32(row.reserved, "reserved")?,
            active: row.active,
            sale_window: SaleWindow {
                opens_at: row.sale_opens_at,
                closes_at: row.sale_closes_at,
            },
            created_at: row.created_at,
        })
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct EntryRow {
    id: Uuid,
    event_id: Uuid,
    category_id: Uuid,
    requester: String,
    requested_quantity: i32,
    offered_quantity: i32,
    status: String,
    position: i64,
    offer_expires_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<EntryRow> for QueueEntry {
    type Error = QueueError;

    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        let status = EntryStatus::parse(&row.status).ok_or_else(|| {
            QueueError::StoreUnavailable(format!("Invalid entry status: {}", row.status))
        })?;
        Ok(Self {
            id: EntryId::from_uuid(row.id),
            event_id: EventId::from_uuid(row.event_id),
            category_id: CategoryId::from_uuid(row.category_id),
            requester: RequesterId::new(row.requester),
            requested_quantity: to_u32(row.requested_quantity, "requested_quantity")?,
            offered_quantity: to_u32(row.offered_quantity, "offered_quantity")?,
            status,
            position: u64::try_from(row.position).map_err(|_| corrupt("position"))?,
            offer_expires_at: row.offer_expires_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Narrow a domain quantity to the `INTEGER` column type.
pub(crate) fn to_i32(value: u32) -> Result<i32, QueueError> {
    i32::try_from(value)
        .map_err(|_| QueueError::Validation(format!("Quantity {value} is out of range")))
}

fn to_u32(value: i32, column: &str) -> Result<u32, QueueError> {
    u32::try_from(value).map_err(|_| corrupt(column))
}

fn corrupt(column: &str) -> QueueError {
    QueueError::StoreUnavailable(format!("Negative value in column {column}"))
}

//! Domain types for the ticket offer queue.
//!
//! This module contains the identifiers, value objects and records shared by every
//! layer of the queue engine:
//!
//! - [`TicketCategory`]: the inventory unit (capacity, sold, reserved)
//! - [`QueueEntry`]: one party's request for tickets in a category
//! - [`EntryStatus`]: the offer state machine
//! - [`Transition`]: a guarded status change paired with its ledger mutation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for an event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random `EventId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EventId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a ticket category (a purchasable tier of an event)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CategoryId(Uuid);

impl CategoryId {
    /// Creates a new random `CategoryId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `CategoryId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CategoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a queue entry
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryId(Uuid);

impl EntryId {
    /// Creates a new random `EntryId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create an `EntryId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque requester identity supplied by the identity collaborator.
///
/// The queue never authenticates; it only compares this value against the
/// requester stored on an entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequesterId(String);

impl RequesterId {
    /// Wrap an identity string
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Multiplies money by a quantity with overflow checking
    #[must_use]
    pub const fn checked_mul(self, quantity: u32) -> Option<Self> {
        match self.0.checked_mul(quantity as u64) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}.{:02}", self.0 / 100, self.0 % 100)
    }
}

// ============================================================================
// Ticket Category (inventory unit)
// ============================================================================

/// Time bounds during which a category can be joined and offered.
///
/// A missing bound is open-ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleWindow {
    /// Sales open at this instant (inclusive)
    pub opens_at: Option<DateTime<Utc>>,
    /// Sales close at this instant (exclusive)
    pub closes_at: Option<DateTime<Utc>>,
}

impl SaleWindow {
    /// A window with no bounds
    #[must_use]
    pub const fn always() -> Self {
        Self {
            opens_at: None,
            closes_at: None,
        }
    }

    /// A window between two instants
    #[must_use]
    pub const fn between(opens_at: DateTime<Utc>, closes_at: DateTime<Utc>) -> Self {
        Self {
            opens_at: Some(opens_at),
            closes_at: Some(closes_at),
        }
    }

    /// Whether `now` falls inside the window
    #[must_use]
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.opens_at.is_none_or(|opens| now >= opens)
            && self.closes_at.is_none_or(|closes| now < closes)
    }
}

/// A purchasable tier within an event, and the ledger row for its inventory.
///
/// Invariant: `sold + reserved <= total`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketCategory {
    /// Category ID
    pub id: CategoryId,
    /// Event this category belongs to
    pub event_id: EventId,
    /// Display name ("VIP", "General")
    pub name: String,
    /// Unit price
    pub price: Money,
    /// Total capacity
    pub total: u32,
    /// Tickets sold (payment confirmed)
    pub sold: u32,
    /// Tickets held by offered or purchasing entries
    pub reserved: u32,
    /// Whether the category is accepting demand at all
    pub active: bool,
    /// Sale window
    pub sale_window: SaleWindow,
    /// When the category was configured
    pub created_at: DateTime<Utc>,
}

impl TicketCategory {
    /// Creates an active category with no sales and an unbounded sale window
    #[must_use]
    pub fn new(
        event_id: EventId,
        name: impl Into<String>,
        price: Money,
        total: u32,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CategoryId::new(),
            event_id,
            name: name.into(),
            price,
            total,
            sold: 0,
            reserved: 0,
            active: true,
            sale_window: SaleWindow::always(),
            created_at,
        }
    }

    /// Tickets neither sold nor reserved. Never negative.
    #[must_use]
    pub const fn available(&self) -> u32 {
        self.total
            .saturating_sub(self.sold)
            .saturating_sub(self.reserved)
    }

    /// Whether `quantity` more tickets can be reserved
    #[must_use]
    pub const fn can_reserve(&self, quantity: u32) -> bool {
        self.available() >= quantity
    }

    /// Whether the category is active and inside its sale window
    #[must_use]
    pub fn is_on_sale(&self, now: DateTime<Utc>) -> bool {
        self.active && self.sale_window.is_open(now)
    }
}

// ============================================================================
// Queue Entry
// ============================================================================

/// Status of a queue entry.
///
/// ```text
/// waiting ──► offered ──► purchasing ──► purchased
///    │           │             │
///    │           ├──► expired  │
///    └───────────┴─────────────┴──► cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// In line, holding nothing
    Waiting,
    /// Holding a time-boxed reservation
    Offered,
    /// Offer accepted, checkout in progress; reservation still held
    Purchasing,
    /// Sale committed
    Purchased,
    /// Offer lapsed; reservation released
    Expired,
    /// Requester left or declined; any reservation released
    Cancelled,
}

impl EntryStatus {
    /// Convert status to its storage representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Offered => "offered",
            Self::Purchasing => "purchasing",
            Self::Purchased => "purchased",
            Self::Expired => "expired",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse status from its storage representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "waiting" => Some(Self::Waiting),
            "offered" => Some(Self::Offered),
            "purchasing" => Some(Self::Purchasing),
            "purchased" => Some(Self::Purchased),
            "expired" => Some(Self::Expired),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal entries are kept for audit but never take part in queue computations.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Purchased | Self::Expired | Self::Cancelled)
    }

    /// Whether an entry in this status counts toward its category's `reserved`.
    #[must_use]
    pub const fn holds_reservation(&self) -> bool {
        matches!(self, Self::Offered | Self::Purchasing)
    }

    /// Whether the state machine permits `self -> next`.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Waiting, Self::Offered | Self::Cancelled)
                | (Self::Offered, Self::Purchasing | Self::Expired | Self::Cancelled)
                | (Self::Purchasing, Self::Purchased | Self::Cancelled)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One party's request for tickets of a category.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Entry ID
    pub id: EntryId,
    /// Event ID
    pub event_id: EventId,
    /// Category ID
    pub category_id: CategoryId,
    /// Who asked
    pub requester: RequesterId,
    /// Tickets asked for
    pub requested_quantity: u32,
    /// Tickets held by the offer (0 until offered; kept afterwards for audit)
    pub offered_quantity: u32,
    /// Current status
    pub status: EntryStatus,
    /// Join order within the category (1-based, strictly increasing)
    pub position: u64,
    /// Offer deadline, set when the entry is offered
    pub offer_expires_at: Option<DateTime<Utc>>,
    /// When the entry joined
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl QueueEntry {
    /// Whether the entry is still offered but past its deadline.
    ///
    /// Expiry is strict: an offer is still valid at exactly `offer_expires_at`.
    #[must_use]
    pub fn is_offer_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.status == EntryStatus::Offered
            && self.offer_expires_at.is_some_and(|expires| now > expires)
    }

    /// Whether `requester` owns this entry
    #[must_use]
    pub fn is_owned_by(&self, requester: &RequesterId) -> bool {
        self.requester == *requester
    }

    /// Quantity currently counted in the category's `reserved`
    #[must_use]
    pub const fn held_quantity(&self) -> u32 {
        if self.status.holds_reservation() {
            self.offered_quantity
        } else {
            0
        }
    }
}

/// Data for inserting a new waiting entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQueueEntry {
    /// Event ID
    pub event_id: EventId,
    /// Category ID
    pub category_id: CategoryId,
    /// Who asked
    pub requester: RequesterId,
    /// Tickets asked for
    pub quantity: u32,
    /// Join timestamp
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Transitions
// ============================================================================

/// Ledger mutation paired with a status change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEffect {
    /// Status-only change
    None,
    /// `reserved += q`, only if `available >= q`
    Reserve(u32),
    /// `reserved -= q`, floored at zero
    Release(u32),
    /// `reserved -= q; sold += q`
    CommitSale(u32),
}

/// A compare-and-swap on an entry's status together with the ledger effect it implies.
///
/// Stores apply the whole value in one transaction: if the entry is not in `from`, or the
/// ledger effect cannot be applied, nothing changes. Constructed only through the named
/// constructors so that every reservation change travels with its status change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    entry_id: EntryId,
    from: EntryStatus,
    to: EntryStatus,
    ledger: LedgerEffect,
    offered_quantity: Option<u32>,
    offer_expires_at: Option<DateTime<Utc>>,
    at: DateTime<Utc>,
}

impl Transition {
    /// `waiting -> offered`, reserving `quantity`.
    #[must_use]
    pub const fn offer(
        entry_id: EntryId,
        quantity: u32,
        expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            entry_id,
            from: EntryStatus::Waiting,
            to: EntryStatus::Offered,
            ledger: LedgerEffect::Reserve(quantity),
            offered_quantity: Some(quantity),
            offer_expires_at: Some(expires_at),
            at,
        }
    }

    /// `offered -> purchasing`; the reservation stays in place.
    #[must_use]
    pub const fn accept(entry_id: EntryId, at: DateTime<Utc>) -> Self {
        Self {
            entry_id,
            from: EntryStatus::Offered,
            to: EntryStatus::Purchasing,
            ledger: LedgerEffect::None,
            offered_quantity: None,
            offer_expires_at: None,
            at,
        }
    }

    /// `purchasing -> purchased`, converting the reservation into a sale.
    #[must_use]
    pub const fn complete(entry_id: EntryId, quantity: u32, at: DateTime<Utc>) -> Self {
        Self {
            entry_id,
            from: EntryStatus::Purchasing,
            to: EntryStatus::Purchased,
            ledger: LedgerEffect::CommitSale(quantity),
            offered_quantity: None,
            offer_expires_at: None,
            at,
        }
    }

    /// `offered -> expired`, releasing the reservation.
    #[must_use]
    pub const fn expire(entry_id: EntryId, quantity: u32, at: DateTime<Utc>) -> Self {
        Self {
            entry_id,
            from: EntryStatus::Offered,
            to: EntryStatus::Expired,
            ledger: LedgerEffect::Release(quantity),
            offered_quantity: None,
            offer_expires_at: None,
            at,
        }
    }

    /// `from -> cancelled`, releasing `held` if `from` holds a reservation.
    #[must_use]
    pub const fn cancel(entry_id: EntryId, from: EntryStatus, held: u32, at: DateTime<Utc>) -> Self {
        let ledger = if from.holds_reservation() && held > 0 {
            LedgerEffect::Release(held)
        } else {
            LedgerEffect::None
        };
        Self {
            entry_id,
            from,
            to: EntryStatus::Cancelled,
            ledger,
            offered_quantity: None,
            offer_expires_at: None,
            at,
        }
    }

    /// Entry being changed
    #[must_use]
    pub const fn entry_id(&self) -> EntryId {
        self.entry_id
    }

    /// Status the entry must currently have
    #[must_use]
    pub const fn from(&self) -> EntryStatus {
        self.from
    }

    /// Status the entry moves to
    #[must_use]
    pub const fn to(&self) -> EntryStatus {
        self.to
    }

    /// Paired ledger mutation
    #[must_use]
    pub const fn ledger(&self) -> LedgerEffect {
        self.ledger
    }

    /// New offered quantity, if the transition sets one
    #[must_use]
    pub const fn offered_quantity(&self) -> Option<u32> {
        self.offered_quantity
    }

    /// New offer deadline, if the transition sets one
    #[must_use]
    pub const fn offer_expires_at(&self) -> Option<DateTime<Utc>> {
        self.offer_expires_at
    }

    /// When the transition happens
    #[must_use]
    pub const fn at(&self) -> DateTime<Utc> {
        self.at
    }

    /// Apply the entry-side fields to an in-memory copy.
    ///
    /// Stores call this after the status guard and ledger effect have succeeded.
    pub fn apply_to(&self, entry: &mut QueueEntry) {
        entry.status = self.to;
        if let Some(quantity) = self.offered_quantity {
            entry.offered_quantity = quantity;
        }
        if let Some(expires_at) = self.offer_expires_at {
            entry.offer_expires_at = Some(expires_at);
        }
        entry.updated_at = self.at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_default()
    }

    #[test]
    fn available_never_negative() {
        let mut category = TicketCategory::new(EventId::new(), "GA", Money::from_cents(0), 3, now());
        category.sold = 2;
        category.reserved = 5;
        assert_eq!(category.available(), 0);
        assert!(!category.can_reserve(1));
    }

    #[test]
    fn sale_window_bounds() {
        let window = SaleWindow::between(now(), now() + Duration::hours(1));
        assert!(!window.is_open(now() - Duration::seconds(1)));
        assert!(window.is_open(now()));
        assert!(!window.is_open(now() + Duration::hours(1)));
        assert!(SaleWindow::always().is_open(now()));
    }

    #[test]
    fn inactive_category_is_not_on_sale() {
        let mut category = TicketCategory::new(EventId::new(), "GA", Money::from_cents(0), 3, now());
        assert!(category.is_on_sale(now()));
        category.active = false;
        assert!(!category.is_on_sale(now()));
    }

    #[test]
    fn status_round_trips_through_storage_form() {
        for status in [
            EntryStatus::Waiting,
            EntryStatus::Offered,
            EntryStatus::Purchasing,
            EntryStatus::Purchased,
            EntryStatus::Expired,
            EntryStatus::Cancelled,
        ] {
            assert_eq!(EntryStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EntryStatus::parse("pending"), None);
    }

    #[test]
    fn state_machine_edges() {
        use EntryStatus::*;
        assert!(Waiting.can_transition_to(Offered));
        assert!(Waiting.can_transition_to(Cancelled));
        assert!(!Waiting.can_transition_to(Purchasing));
        assert!(Offered.can_transition_to(Expired));
        assert!(Purchasing.can_transition_to(Purchased));
        assert!(!Purchasing.can_transition_to(Expired));
        assert!(!Expired.can_transition_to(Offered));
        assert!(!Purchased.can_transition_to(Cancelled));
    }

    #[test]
    fn cancel_from_waiting_releases_nothing() {
        let t = Transition::cancel(EntryId::new(), EntryStatus::Waiting, 2, now());
        assert_eq!(t.ledger(), LedgerEffect::None);

        let t = Transition::cancel(EntryId::new(), EntryStatus::Purchasing, 2, now());
        assert_eq!(t.ledger(), LedgerEffect::Release(2));
    }

    #[test]
    fn lapsed_offer_is_strictly_after_deadline() {
        let deadline = now() + Duration::minutes(15);
        let entry = QueueEntry {
            id: EntryId::new(),
            event_id: EventId::new(),
            category_id: CategoryId::new(),
            requester: RequesterId::new("alice"),
            requested_quantity: 1,
            offered_quantity: 1,
            status: EntryStatus::Offered,
            position: 1,
            offer_expires_at: Some(deadline),
            created_at: now(),
            updated_at: now(),
        };
        assert!(!entry.is_offer_lapsed(deadline));
        assert!(entry.is_offer_lapsed(deadline + Duration::seconds(1)));
        assert_eq!(entry.held_quantity(), 1);
    }

    #[test]
    fn money_formats_as_dollars() {
        assert_eq!(Money::from_cents(12_345).to_string(), "$123.45");
        assert_eq!(Money::from_cents(500).checked_mul(3), Some(Money::from_cents(1500)));
        assert_eq!(Money::from_cents(u64::MAX).checked_mul(2), None);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&EntryStatus::Purchasing).unwrap_or_default();
        assert_eq!(json, "\"purchasing\"");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn available_accounts_for_every_ticket(
                total in 0u32..1_000,
                sold in 0u32..1_000,
                reserved in 0u32..1_000,
            ) {
                let mut category = TicketCategory::new(EventId::new(), "GA", Money::from_cents(0), total, now());
                category.sold = sold;
                category.reserved = reserved;

                let available = category.available();
                prop_assert!(available <= total);
                if sold + reserved <= total {
                    prop_assert_eq!(available + sold + reserved, total);
                } else {
                    prop_assert_eq!(available, 0);
                }
                prop_assert_eq!(category.can_reserve(available), true);
                prop_assert_eq!(category.can_reserve(available + 1), false);
            }

            #[test]
            fn held_quantity_follows_status(quantity in 1u32..=8, pick in 0usize..6) {
                let status = [
                    EntryStatus::Waiting,
                    EntryStatus::Offered,
                    EntryStatus::Purchasing,
                    EntryStatus::Purchased,
                    EntryStatus::Expired,
                    EntryStatus::Cancelled,
                ][pick];
                let entry = QueueEntry {
                    id: EntryId::new(),
                    event_id: EventId::new(),
                    category_id: CategoryId::new(),
                    requester: RequesterId::new("alice"),
                    requested_quantity: quantity,
                    offered_quantity: quantity,
                    status,
                    position: 1,
                    offer_expires_at: None,
                    created_at: now(),
                    updated_at: now(),
                };
                let expected = if status.holds_reservation() { quantity } else { 0 };
                prop_assert_eq!(entry.held_quantity(), expected);
                prop_assert!(!(status.is_terminal() && status.holds_reservation()));
            }
        }
    }
}

//! End-to-end scenarios for the offer queue over the in-memory store.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use ticket_queue_core::environment::Clock;
use ticket_queue_core::{
    CategoryId, EntryStatus, EventId, Money, QueueEntry, QueueError, RequesterId, SaleWindow,
    TicketCategory,
};
use ticket_queue_runtime::{FulfillmentPolicy, QueueConfig, TicketQueue};
use ticket_queue_testing::{
    CategoryBuilder, InMemoryQueueStore, ManualClock, assert_ledger_consistent,
};

const WINDOW_SECS: i64 = 15 * 60;

struct Engine {
    queue: TicketQueue,
    store: Arc<InMemoryQueueStore>,
    clock: Arc<ManualClock>,
    category: TicketCategory,
}

impl Engine {
    async fn new(total: u32) -> Self {
        Self::with(CategoryBuilder::new(EventId::new()).total(total).build(), FulfillmentPolicy::Partial)
            .await
    }

    async fn with(category: TicketCategory, policy: FulfillmentPolicy) -> Self {
        let store = Arc::new(InMemoryQueueStore::new());
        let clock = Arc::new(ManualClock::default());
        let config = QueueConfig::default()
            .with_offer_window(Duration::from_secs(WINDOW_SECS.unsigned_abs()))
            .with_fulfillment(policy);
        let queue = TicketQueue::new(store.clone(), clock.clone(), config).unwrap();
        queue.register_category(category.clone()).await.unwrap();
        Self {
            queue,
            store,
            clock,
            category,
        }
    }

    async fn join(&self, who: &str, quantity: u32) -> QueueEntry {
        self.queue
            .join_queue(
                self.category.event_id,
                self.category.id,
                RequesterId::new(who),
                quantity,
            )
            .await
            .unwrap()
            .entry
    }

    async fn entry(&self, entry: &QueueEntry) -> QueueEntry {
        use ticket_queue_core::QueueStore;
        self.store.load_entry(entry.id).await.unwrap().unwrap()
    }

    fn pass_deadline(&self) {
        self.clock.advance(ChronoDuration::seconds(WINDOW_SECS + 1));
    }

    async fn check(&self) {
        assert_ledger_consistent(self.store.as_ref(), self.category.id).await;
    }
}

fn who(name: &str) -> RequesterId {
    RequesterId::new(name)
}

#[tokio::test]
async fn single_ticket_passes_to_next_in_line_after_expiry() {
    let engine = Engine::new(1).await;

    let first = engine.join("first", 1).await;
    assert_eq!(first.status, EntryStatus::Offered);
    assert_eq!(first.offered_quantity, 1);
    assert_eq!(
        first.offer_expires_at,
        Some(engine.clock.now() + ChronoDuration::seconds(WINDOW_SECS))
    );

    let second = engine.join("second", 1).await;
    assert_eq!(second.status, EntryStatus::Waiting);
    let position = engine
        .queue
        .get_position(engine.category.event_id, engine.category.id, &who("second"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(position.rank, Some(1));
    assert_eq!(position.entries_ahead, 0);

    engine.pass_deadline();
    let report = engine.queue.sweep().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(report.promoted, 1);

    assert_eq!(engine.entry(&first).await.status, EntryStatus::Expired);
    let second = engine.entry(&second).await;
    assert_eq!(second.status, EntryStatus::Offered);
    assert!(second.offer_expires_at.unwrap() > engine.clock.now());

    let err = engine.queue.accept_offer(first.id, &who("first")).await.unwrap_err();
    assert!(err.should_rejoin());
    engine.check().await;
}

#[tokio::test]
async fn partial_fulfilment_offers_what_is_left() {
    let engine = Engine::new(5).await;

    let a = engine.join("a", 2).await;
    let b = engine.join("b", 2).await;
    let c = engine.join("c", 2).await;

    assert_eq!((a.status, a.offered_quantity), (EntryStatus::Offered, 2));
    assert_eq!((b.status, b.offered_quantity), (EntryStatus::Offered, 2));
    assert_eq!((c.status, c.offered_quantity), (EntryStatus::Offered, 1));
    assert_eq!(c.requested_quantity, 2);

    let availability = engine.queue.get_availability(engine.category.id).await.unwrap();
    assert_eq!(availability.reserved, 5);
    assert_eq!(availability.available, 0);
    engine.check().await;
}

#[tokio::test]
async fn all_or_nothing_head_blocks_later_entries() {
    let category = CategoryBuilder::new(EventId::new()).total(5).build();
    let engine = Engine::with(category, FulfillmentPolicy::AllOrNothing).await;

    let a = engine.join("a", 2).await;
    engine.join("b", 2).await;
    let c = engine.join("c", 2).await;
    assert_eq!(c.status, EntryStatus::Waiting);

    // One ticket is free and d only wants one, but c is ahead.
    let d = engine.join("d", 1).await;
    assert_eq!(d.status, EntryStatus::Waiting);
    assert_eq!(
        engine.queue.get_availability(engine.category.id).await.unwrap().available,
        1
    );

    engine.queue.decline_offer(a.id, &who("a")).await.unwrap();
    let c = engine.entry(&c).await;
    let d = engine.entry(&d).await;
    assert_eq!((c.status, c.offered_quantity), (EntryStatus::Offered, 2));
    assert_eq!((d.status, d.offered_quantity), (EntryStatus::Offered, 1));
    engine.check().await;
}

#[tokio::test]
async fn accept_then_complete_sells_the_tickets() {
    let category = CategoryBuilder::new(EventId::new())
        .total(3)
        .price_cents(7_500)
        .build();
    let engine = Engine::with(category, FulfillmentPolicy::Partial).await;

    let alice = engine.join("alice", 2).await;
    let handle = engine.queue.accept_offer(alice.id, &who("alice")).await.unwrap();
    assert_eq!(handle.quantity, 2);
    assert_eq!(handle.unit_price, Money::from_cents(7_500));
    assert_eq!(handle.total, Money::from_cents(15_000));
    assert_eq!(engine.entry(&alice).await.status, EntryStatus::Purchasing);

    // Retried accept hands back the same purchase.
    let again = engine.queue.accept_offer(alice.id, &who("alice")).await.unwrap();
    assert_eq!(again, handle);

    let purchased = engine.queue.complete_purchase(alice.id).await.unwrap();
    assert_eq!(purchased.status, EntryStatus::Purchased);
    let again = engine.queue.complete_purchase(alice.id).await.unwrap();
    assert_eq!(again, purchased);

    let availability = engine.queue.get_availability(engine.category.id).await.unwrap();
    assert_eq!((availability.sold, availability.reserved), (2, 0));
    assert_eq!(availability.available, 1);

    // Purchased entries are not active; the buyer may queue again.
    assert!(
        engine
            .queue
            .get_position(engine.category.event_id, engine.category.id, &who("alice"))
            .await
            .unwrap()
            .is_none()
    );
    engine.check().await;
}

#[tokio::test]
async fn complete_requires_accepted_offer() {
    let engine = Engine::new(1).await;
    let alice = engine.join("alice", 1).await;

    let err = engine.queue.complete_purchase(alice.id).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            expected: EntryStatus::Purchasing,
            actual: EntryStatus::Offered,
            ..
        }
    ));
}

#[tokio::test]
async fn payment_failure_releases_to_next_in_line() {
    let engine = Engine::new(2).await;
    let alice = engine.join("alice", 2).await;
    let bob = engine.join("bob", 1).await;
    assert_eq!(bob.status, EntryStatus::Waiting);

    engine.queue.accept_offer(alice.id, &who("alice")).await.unwrap();
    let cancelled = engine.queue.decline_offer(alice.id, &who("alice")).await.unwrap();
    assert_eq!(cancelled.status, EntryStatus::Cancelled);

    let bob = engine.entry(&bob).await;
    assert_eq!((bob.status, bob.offered_quantity), (EntryStatus::Offered, 1));
    engine.check().await;
}

#[tokio::test]
async fn decline_requires_an_offer() {
    let engine = Engine::new(1).await;
    engine.join("alice", 1).await;
    let bob = engine.join("bob", 1).await;

    let err = engine.queue.decline_offer(bob.id, &who("bob")).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            actual: EntryStatus::Waiting,
            ..
        }
    ));
}

#[tokio::test]
async fn leaving_the_queue() {
    let engine = Engine::new(1).await;
    let alice = engine.join("alice", 1).await;
    let bob = engine.join("bob", 1).await;
    let carol = engine.join("carol", 1).await;

    // Waiting entry: no inventory moves.
    let left = engine.queue.leave_queue(bob.id, &who("bob")).await.unwrap();
    assert_eq!(left.status, EntryStatus::Cancelled);
    assert_eq!(engine.queue.get_availability(engine.category.id).await.unwrap().reserved, 1);

    // Leaving again is a no-op.
    let again = engine.queue.leave_queue(bob.id, &who("bob")).await.unwrap();
    assert_eq!(again.status, EntryStatus::Cancelled);

    // Offered entry: the ticket goes to carol.
    engine.queue.leave_queue(alice.id, &who("alice")).await.unwrap();
    let carol = engine.entry(&carol).await;
    assert_eq!(carol.status, EntryStatus::Offered);

    // In checkout: leaving is not allowed, declining is.
    engine.queue.accept_offer(carol.id, &who("carol")).await.unwrap();
    let err = engine.queue.leave_queue(carol.id, &who("carol")).await.unwrap_err();
    assert!(matches!(
        err,
        QueueError::InvalidTransition {
            actual: EntryStatus::Purchasing,
            ..
        }
    ));
    engine.check().await;
}

#[tokio::test]
async fn duplicate_join_returns_existing_entry() {
    let engine = Engine::new(1).await;
    engine.join("holder", 1).await;

    let first = engine
        .queue
        .join_queue(engine.category.event_id, engine.category.id, who("alice"), 1)
        .await
        .unwrap();
    assert!(first.created);

    let second = engine
        .queue
        .join_queue(engine.category.event_id, engine.category.id, who("alice"), 1)
        .await
        .unwrap();
    assert!(!second.created);
    assert_eq!(second.entry.id, first.entry.id);
    assert_eq!(second.entry.position, first.entry.position);

    let availability = engine.queue.get_availability(engine.category.id).await.unwrap();
    assert_eq!(availability.waiting_entries, 1);
}

#[tokio::test]
async fn rejoining_with_a_lapsed_offer_goes_to_the_back() {
    let engine = Engine::new(1).await;
    let alice = engine.join("alice", 1).await;
    let bob = engine.join("bob", 1).await;
    engine.pass_deadline();

    let rejoined = engine
        .queue
        .join_queue(engine.category.event_id, engine.category.id, who("alice"), 1)
        .await
        .unwrap();
    assert!(rejoined.created);
    assert_ne!(rejoined.entry.id, alice.id);
    assert_eq!(rejoined.entry.status, EntryStatus::Waiting);
    assert!(rejoined.entry.position > bob.position);

    assert_eq!(engine.entry(&alice).await.status, EntryStatus::Expired);
    assert_eq!(engine.entry(&bob).await.status, EntryStatus::Offered);
    engine.check().await;
}

#[tokio::test]
async fn only_the_owner_may_act_on_an_entry() {
    let engine = Engine::new(1).await;
    let alice = engine.join("alice", 1).await;
    let mallory = who("mallory");

    assert!(matches!(
        engine.queue.accept_offer(alice.id, &mallory).await,
        Err(QueueError::Unauthorized { .. })
    ));
    assert!(matches!(
        engine.queue.decline_offer(alice.id, &mallory).await,
        Err(QueueError::Unauthorized { .. })
    ));
    assert!(matches!(
        engine.queue.leave_queue(alice.id, &mallory).await,
        Err(QueueError::Unauthorized { .. })
    ));
    assert_eq!(engine.entry(&alice).await.status, EntryStatus::Offered);
}

#[tokio::test]
async fn accepting_after_the_deadline_expires_the_offer() {
    let engine = Engine::new(1).await;
    let alice = engine.join("alice", 1).await;
    let bob = engine.join("bob", 1).await;
    engine.pass_deadline();

    let err = engine.queue.accept_offer(alice.id, &who("alice")).await.unwrap_err();
    assert!(matches!(err, QueueError::OfferExpired { entry_id, .. } if entry_id == alice.id));
    assert_eq!(err.code(), "OFFER_EXPIRED");

    assert_eq!(engine.entry(&alice).await.status, EntryStatus::Expired);
    assert_eq!(engine.entry(&bob).await.status, EntryStatus::Offered);

    // Nothing left for the sweep to do.
    assert_eq!(engine.queue.sweep().await.unwrap().expired, 0);
    engine.check().await;
}

#[tokio::test]
async fn offer_is_still_valid_at_its_deadline() {
    let engine = Engine::new(1).await;
    let alice = engine.join("alice", 1).await;
    engine.clock.advance(ChronoDuration::seconds(WINDOW_SECS));

    let handle = engine.queue.accept_offer(alice.id, &who("alice")).await.unwrap();
    assert_eq!(handle.entry_id, alice.id);
}

#[tokio::test]
async fn declining_after_the_deadline_reports_expiry() {
    let engine = Engine::new(1).await;
    let alice = engine.join("alice", 1).await;
    engine.pass_deadline();

    let err = engine.queue.decline_offer(alice.id, &who("alice")).await.unwrap_err();
    assert!(err.should_rejoin());
    assert_eq!(engine.entry(&alice).await.status, EntryStatus::Expired);
    engine.check().await;
}

#[tokio::test]
async fn sweeping_twice_releases_once() {
    let engine = Engine::new(3).await;
    engine.join("a", 1).await;
    engine.join("b", 2).await;
    engine.pass_deadline();

    let first = engine.queue.sweep().await.unwrap();
    assert_eq!(first.expired, 2);
    assert_eq!(first.released, 3);

    let second = engine.queue.sweep().await.unwrap();
    assert_eq!(second.expired, 0);
    assert_eq!(second.released, 0);

    let availability = engine.queue.get_availability(engine.category.id).await.unwrap();
    assert_eq!(availability.available, 3);
    engine.check().await;
}

#[tokio::test]
async fn position_reports_rank_and_demand_ahead() {
    let engine = Engine::new(4).await;
    engine.join("holder", 4).await;
    engine.join("a", 2).await;
    engine.join("b", 3).await;
    engine.join("c", 1).await;

    let c = engine
        .queue
        .get_position(engine.category.event_id, engine.category.id, &who("c"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(c.rank, Some(3));
    assert_eq!(c.entries_ahead, 2);
    assert_eq!(c.tickets_ahead, 5);
    assert!(!c.should_rejoin);

    let holder = engine
        .queue
        .get_position(engine.category.event_id, engine.category.id, &who("holder"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(holder.entry.status, EntryStatus::Offered);
    assert_eq!(holder.rank, None);

    let availability = engine.queue.get_availability(engine.category.id).await.unwrap();
    assert_eq!(availability.waiting_entries, 3);
    assert!(availability.on_sale);
}

#[tokio::test]
async fn position_after_lapse_asks_to_rejoin() {
    let engine = Engine::new(1).await;
    engine.join("alice", 1).await;
    engine.pass_deadline();

    let view = engine
        .queue
        .get_position(engine.category.event_id, engine.category.id, &who("alice"))
        .await
        .unwrap()
        .unwrap();
    assert!(view.should_rejoin);
    assert_eq!(view.entry.status, EntryStatus::Expired);
    assert_eq!(view.rank, None);
    engine.check().await;
}

#[tokio::test]
async fn joining_a_closed_category_fails() {
    let inactive = CategoryBuilder::new(EventId::new()).active(false).build();
    let engine = Engine::with(inactive, FulfillmentPolicy::Partial).await;
    let err = engine
        .queue
        .join_queue(engine.category.event_id, engine.category.id, who("alice"), 1)
        .await
        .unwrap_err();
    assert_eq!(err, QueueError::SalesClosed(engine.category.id));

    let opens = ticket_queue_testing::test_clock().now() + ChronoDuration::days(1);
    let not_yet = CategoryBuilder::new(EventId::new())
        .sale_window(SaleWindow::between(opens, opens + ChronoDuration::days(7)))
        .build();
    let engine = Engine::with(not_yet, FulfillmentPolicy::Partial).await;
    let err = engine
        .queue
        .join_queue(engine.category.event_id, engine.category.id, who("alice"), 1)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SALES_CLOSED");
}

#[tokio::test]
async fn join_validation() {
    let engine = Engine::new(3).await;
    let (event_id, category_id) = (engine.category.event_id, engine.category.id);

    for quantity in [0, 4, 9] {
        let err = engine
            .queue
            .join_queue(event_id, category_id, who("alice"), quantity)
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::Validation(_)), "quantity {quantity}: {err}");
    }

    let err = engine
        .queue
        .join_queue(EventId::new(), category_id, who("alice"), 1)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)));

    let missing = CategoryId::new();
    assert_eq!(
        engine.queue.join_queue(event_id, missing, who("alice"), 1).await,
        Err(QueueError::CategoryNotFound(missing))
    );

    let availability = engine.queue.get_availability(category_id).await.unwrap();
    assert_eq!((availability.reserved, availability.waiting_entries), (0, 0));
}

#[tokio::test]
async fn store_outage_surfaces_as_transient_error() {
    let engine = Engine::new(1).await;
    engine.store.set_offline(true);

    let err = engine
        .queue
        .join_queue(engine.category.event_id, engine.category.id, who("alice"), 1)
        .await
        .unwrap_err();
    assert!(err.is_transient());

    engine.store.set_offline(false);
    let alice = engine.join("alice", 1).await;
    assert_eq!(alice.status, EntryStatus::Offered);
}

#[tokio::test]
async fn unservable_head_is_dropped_so_later_entries_get_the_ticket() {
    let category = CategoryBuilder::new(EventId::new()).total(3).build();
    let engine = Engine::with(category, FulfillmentPolicy::AllOrNothing).await;

    let a = engine.join("a", 2).await;
    let b = engine.join("b", 1).await;
    let c = engine.join("c", 2).await;
    let d = engine.join("d", 1).await;
    assert_eq!((c.status, d.status), (EntryStatus::Waiting, EntryStatus::Waiting));

    engine.queue.accept_offer(a.id, &who("a")).await.unwrap();
    engine.queue.complete_purchase(a.id).await.unwrap();

    // One ticket is left unsold; c wants two and can never be served.
    engine.queue.decline_offer(b.id, &who("b")).await.unwrap();
    assert_eq!(engine.entry(&c).await.status, EntryStatus::Cancelled);
    let d = engine.entry(&d).await;
    assert_eq!((d.status, d.offered_quantity), (EntryStatus::Offered, 1));

    let availability = engine.queue.get_availability(engine.category.id).await.unwrap();
    assert_eq!((availability.sold, availability.reserved), (2, 1));
    assert_eq!(availability.waiting_entries, 0);
    engine.check().await;
}

#[tokio::test]
async fn join_is_limited_to_unsold_tickets() {
    let category = CategoryBuilder::new(EventId::new()).total(5).sold(4).build();
    let engine = Engine::with(category, FulfillmentPolicy::AllOrNothing).await;

    let err = engine
        .queue
        .join_queue(engine.category.event_id, engine.category.id, who("alice"), 2)
        .await
        .unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)), "{err}");

    let alice = engine.join("alice", 1).await;
    assert_eq!(alice.status, EntryStatus::Offered);
}

#[tokio::test]
async fn position_after_sweep_expiry_asks_to_rejoin() {
    let engine = Engine::new(1).await;
    let alice = engine.join("alice", 1).await;
    engine.pass_deadline();
    assert_eq!(engine.queue.sweep().await.unwrap().expired, 1);

    let view = engine
        .queue
        .get_position(engine.category.event_id, engine.category.id, &who("alice"))
        .await
        .unwrap()
        .unwrap();
    assert!(view.should_rejoin);
    assert_eq!(view.entry.id, alice.id);
    assert_eq!(view.entry.status, EntryStatus::Expired);

    // Once she has joined again and left, there is nothing to report.
    let rejoined = engine.join("alice", 1).await;
    engine.queue.leave_queue(rejoined.id, &who("alice")).await.unwrap();
    assert!(
        engine
            .queue
            .get_position(engine.category.event_id, engine.category.id, &who("alice"))
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        engine
            .queue
            .get_position(engine.category.event_id, engine.category.id, &who("nobody"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn overflowing_total_leaves_the_offer_in_place() {
    let category = CategoryBuilder::new(EventId::new())
        .total(3)
        .price_cents(u64::MAX / 2 + 1)
        .build();
    let engine = Engine::with(category, FulfillmentPolicy::Partial).await;
    let alice = engine.join("alice", 2).await;

    let err = engine.queue.accept_offer(alice.id, &who("alice")).await.unwrap_err();
    assert!(matches!(err, QueueError::Validation(_)), "{err}");

    let alice = engine.entry(&alice).await;
    assert_eq!(alice.status, EntryStatus::Offered);
    assert_eq!(engine.queue.get_availability(engine.category.id).await.unwrap().reserved, 2);

    // The offer can still be given up normally.
    engine.queue.decline_offer(alice.id, &who("alice")).await.unwrap();
    assert_eq!(engine.queue.get_availability(engine.category.id).await.unwrap().reserved, 0);
    engine.check().await;
}

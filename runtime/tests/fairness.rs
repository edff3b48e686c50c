//! Property tests: offers are only ever made in join order, and the ledger never drifts.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use chrono::Duration as ChronoDuration;
use proptest::prelude::*;
use std::sync::Arc;
use ticket_queue_core::{CategoryId, EntryStatus, EventId, QueueStore, RequesterId};
use ticket_queue_runtime::{FulfillmentPolicy, QueueConfig, TicketQueue};
use ticket_queue_testing::{CategoryBuilder, InMemoryQueueStore, ManualClock, check_ledger};

/// Among live entries in position order, no waiting entry may precede one holding an
/// offer, and a waiting head means the policy could not serve it.
async fn check_fifo(
    store: &InMemoryQueueStore,
    category_id: CategoryId,
    policy: FulfillmentPolicy,
) -> Result<(), String> {
    let entries = store.list_entries(category_id).await.map_err(|e| e.to_string())?;
    let mut seen_waiting = false;
    for entry in entries.iter().filter(|e| !e.status.is_terminal()) {
        match entry.status {
            EntryStatus::Waiting => seen_waiting = true,
            _ if seen_waiting => {
                return Err(format!(
                    "entry at position {} is {} behind a waiting entry",
                    entry.position, entry.status
                ));
            }
            _ => {}
        }
    }

    let available = store.available(category_id).await.map_err(|e| e.to_string())?;
    let head = entries.iter().find(|e| e.status == EntryStatus::Waiting);
    if let Some(head) = head {
        if policy
            .offer_quantity(head.requested_quantity, available)
            .is_some()
        {
            return Err(format!(
                "head at position {} wants {} with {available} free but is still waiting",
                head.position, head.requested_quantity
            ));
        }
    }
    check_ledger(store, category_id).await
}

async fn run(
    total: u32,
    requests: Vec<u32>,
    declines: Vec<prop::sample::Index>,
    policy: FulfillmentPolicy,
) -> Result<(), String> {
    let store = Arc::new(InMemoryQueueStore::new());
    let clock = Arc::new(ManualClock::default());
    let config = QueueConfig::default().with_fulfillment(policy);
    let queue = TicketQueue::new(store.clone(), clock.clone(), config).map_err(|e| e.to_string())?;
    let category = CategoryBuilder::new(EventId::new()).total(total).build();
    queue
        .register_category(category.clone())
        .await
        .map_err(|e| e.to_string())?;

    for (i, quantity) in requests.iter().enumerate() {
        queue
            .join_queue(
                category.event_id,
                category.id,
                RequesterId::new(format!("r{i}")),
                (*quantity).min(total),
            )
            .await
            .map_err(|e| e.to_string())?;
        check_fifo(&store, category.id, policy).await?;
    }

    for index in declines {
        let offered: Vec<_> = store
            .list_entries(category.id)
            .await
            .map_err(|e| e.to_string())?
            .into_iter()
            .filter(|e| e.status == EntryStatus::Offered)
            .collect();
        if offered.is_empty() {
            break;
        }
        let entry = index.get(&offered);
        queue
            .decline_offer(entry.id, &entry.requester)
            .await
            .map_err(|e| e.to_string())?;
        check_fifo(&store, category.id, policy).await?;
    }

    clock.advance(ChronoDuration::minutes(16));
    queue.sweep().await.map_err(|e| e.to_string())?;
    check_fifo(&store, category.id, policy).await
}

fn policy() -> impl Strategy<Value = FulfillmentPolicy> {
    prop_oneof![
        Just(FulfillmentPolicy::Partial),
        Just(FulfillmentPolicy::AllOrNothing),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn offers_follow_join_order(
        total in 1u32..=10,
        requests in prop::collection::vec(1u32..=4, 1..20),
        declines in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        policy in policy(),
    ) {
        let outcome = tokio_test::block_on(run(total, requests, declines, policy));
        prop_assert_eq!(outcome, Ok(()));
    }
}

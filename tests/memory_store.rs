//! The in-memory eventstore run through the conformance suite, plus the
//! concurrency race of two writers on one fresh aggregate.

mod common;

use std::sync::Arc;

use stronghold::config::EventStoreConfig;
use stronghold::error::Error;
use stronghold::store::{EventStore, MemoryEventStore};

use common::org_added;

#[tokio::test]
async fn memory_store_conformance() {
    common::store_conformance(Arc::new(MemoryEventStore::default())).await;
}

#[tokio::test]
async fn oversized_batches_are_rejected() {
    let store = MemoryEventStore::new(EventStoreConfig::builder().max_push_batch_size(2).build());
    let batch = vec![
        org_added("o1", "a"),
        org_added("o1", "b"),
        org_added("o1", "c"),
    ];
    assert!(matches!(
        store.push_many(batch).await,
        Err(Error::Validation { .. })
    ));
}

#[tokio::test]
async fn concurrent_first_writers_race_to_version_one() {
    let store = Arc::new(MemoryEventStore::default());

    let a = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store
                .push_with_concurrency_check(vec![org_added("u1", "first")], 0)
                .await
        })
    };
    let b = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            store
                .push_with_concurrency_check(vec![org_added("u1", "second")], 0)
                .await
        })
    };

    let results = [a.await.unwrap(), b.await.unwrap()];
    let wins = results.iter().filter(|result| result.is_ok()).count();
    assert_eq!(wins, 1, "exactly one writer may create version 1");

    let loss = results
        .iter()
        .find_map(|result| result.as_ref().err())
        .expect("one writer must lose");
    match loss {
        Error::Concurrency { expected, actual } => {
            assert_eq!(*expected, 0);
            assert_eq!(*actual, 1);
        }
        other => panic!("expected concurrency error, got {other:?}"),
    }
}

#[tokio::test]
async fn subscriptions_deliver_committed_events() {
    let store = MemoryEventStore::new(
        EventStoreConfig::builder().enable_subscriptions(true).build(),
    );
    let mut receiver = store.subscribe().expect("subscriptions enabled");

    store.push(org_added("o1", "Acme")).await.unwrap();
    let event = receiver.recv().await.unwrap();
    assert_eq!(event.event_type, "org.added");
    assert_eq!(event.aggregate_id, "o1");
}

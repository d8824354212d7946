//! Postgres eventstore behavior, including the conformance suite and
//! the cross-process concurrency race.

mod common;

use std::sync::Arc;

use sqlx::PgPool;
use stronghold::config::EventStoreConfig;
use stronghold::error::Error;
use stronghold::store::{EventStore, PgEventStore};
use stronghold::types::AggregateKind;

use common::{org_added, org_changed, INSTANCE};

async fn store(pool: PgPool) -> PgEventStore {
    PgEventStore::new(pool, EventStoreConfig::default())
        .await
        .unwrap()
}

#[sqlx::test]
async fn postgres_store_conformance(pool: PgPool) {
    common::store_conformance(Arc::new(store(pool).await)).await;
}

#[sqlx::test]
async fn migrations_are_idempotent(pool: PgPool) {
    let _ = store(pool.clone()).await;
    let _ = store(pool.clone()).await;

    let exists: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM information_schema.tables WHERE table_name = 'events')",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert!(exists);
}

#[sqlx::test]
async fn concurrent_writers_on_one_aggregate(pool: PgPool) {
    let store = Arc::new(store(pool).await);

    let mut tasks = Vec::new();
    for index in 0..4 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store
                .push_with_concurrency_check(vec![org_added("u1", &format!("writer-{index}"))], 0)
                .await
        }));
    }

    let mut wins = 0;
    let mut losses = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(events) => {
                assert_eq!(events[0].aggregate_version, 1);
                wins += 1;
            }
            Err(Error::Concurrency { expected, actual }) => {
                assert_eq!(expected, 0);
                assert_eq!(actual, 1);
                losses += 1;
            }
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(losses, 3);

    let history = store
        .aggregate(INSTANCE, &AggregateKind::Org, "u1", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.version, 1);
}

#[sqlx::test]
async fn unchecked_pushes_serialize_without_gaps(pool: PgPool) {
    let store = Arc::new(store(pool).await);

    let mut tasks = Vec::new();
    for index in 0..8 {
        let store = Arc::clone(&store);
        tasks.push(tokio::spawn(async move {
            store.push(org_changed("o1", &format!("rename-{index}"))).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let history = store
        .aggregate(INSTANCE, &AggregateKind::Org, "o1", None)
        .await
        .unwrap()
        .unwrap();
    let versions: Vec<i64> = history
        .events
        .iter()
        .map(|event| event.aggregate_version)
        .collect();
    assert_eq!(versions, (1..=8).collect::<Vec<i64>>());
}

#[sqlx::test]
async fn max_position_tracks_the_log_head(pool: PgPool) {
    let store = store(pool).await;
    assert_eq!(store.max_position().await.unwrap(), 0);

    let event = store.push(org_added("o1", "Acme")).await.unwrap();
    assert_eq!(store.max_position().await.unwrap(), event.position.position);
}

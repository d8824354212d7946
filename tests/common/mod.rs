//! Shared fixtures and the store conformance suite, run against both
//! eventstore implementations.
#![allow(dead_code)]

use std::sync::Arc;

use stronghold::error::Error;
use stronghold::event::{EventCommand, EventPayload, OrgAdded, OrgChanged};
use stronghold::store::{EventFilter, EventStore};
use stronghold::types::{AggregateKind, Position};

pub const INSTANCE: &str = "inst-1";

pub fn org_added(org_id: &str, name: &str) -> EventCommand {
    EventCommand::new(
        org_id,
        EventPayload::OrgAdded(OrgAdded {
            name: name.to_owned(),
        }),
        "tester",
        org_id,
        INSTANCE,
    )
}

pub fn org_changed(org_id: &str, name: &str) -> EventCommand {
    EventCommand::new(
        org_id,
        EventPayload::OrgChanged(OrgChanged {
            name: name.to_owned(),
        }),
        "tester",
        org_id,
        INSTANCE,
    )
}

/// The behavior every [`EventStore`] must share.
pub async fn store_conformance(store: Arc<dyn EventStore>) {
    // Versions start at 1 and have no gaps; a batch shares one position.
    let first = store
        .push_many(vec![org_added("o1", "Acme"), org_changed("o1", "Acme Corp")])
        .await
        .unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0].aggregate_version, 1);
    assert_eq!(first[1].aggregate_version, 2);
    assert_eq!(first[0].position.position, first[1].position.position);
    assert_eq!(first[0].position.in_position_order, 0);
    assert_eq!(first[1].position.in_position_order, 1);

    // A second push continues the version sequence at a later position.
    let second = store.push(org_changed("o1", "Acme Inc")).await.unwrap();
    assert_eq!(second.aggregate_version, 3);
    assert!(second.position > first[1].position);

    // Concurrency check: correct expectation passes, stale one fails
    // with both versions reported.
    let checked = store
        .push_with_concurrency_check(vec![org_changed("o1", "Acme AG")], 3)
        .await
        .unwrap();
    assert_eq!(checked[0].aggregate_version, 4);

    match store
        .push_with_concurrency_check(vec![org_changed("o1", "stale")], 3)
        .await
    {
        Err(Error::Concurrency { expected, actual }) => {
            assert_eq!(expected, 3);
            assert_eq!(actual, 4);
        }
        other => panic!("expected concurrency error, got {other:?}"),
    }

    // latest_event and aggregate history.
    let latest = store
        .latest_event(INSTANCE, &AggregateKind::Org, "o1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.aggregate_version, 4);

    let history = store
        .aggregate(INSTANCE, &AggregateKind::Org, "o1", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.version, 4);
    assert_eq!(history.events.len(), 4);
    let until = store
        .aggregate(INSTANCE, &AggregateKind::Org, "o1", Some(2))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(until.version, 2);

    assert!(store
        .aggregate(INSTANCE, &AggregateKind::Org, "missing", None)
        .await
        .unwrap()
        .is_none());

    // Filtered reads and counting.
    let adds = store
        .events(
            &EventFilter::new()
                .instance(INSTANCE)
                .event_type("org.added"),
        )
        .await
        .unwrap();
    assert_eq!(adds.len(), 1);

    let count = store
        .count(&EventFilter::new().aggregate_type(AggregateKind::Org))
        .await
        .unwrap();
    assert_eq!(count, 4);

    // events_after_position walks the total order without gaps or dupes.
    let all = store
        .events_after_position(Position::genesis(), 100)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
    for pair in all.windows(2) {
        assert!(pair[0].position < pair[1].position);
    }
    let tail = store
        .events_after_position(all[1].position, 100)
        .await
        .unwrap();
    assert_eq!(tail.len(), 2);

    // search is a union without duplicates.
    let union = store
        .search(&[
            EventFilter::new().event_type("org.added"),
            EventFilter::new().event_type("org.added"),
            EventFilter::new().event_type("org.changed"),
        ])
        .await
        .unwrap();
    assert_eq!(union.len(), 4);

    // Batch validation failures.
    assert!(matches!(
        store.push_many(vec![]).await,
        Err(Error::Validation { .. })
    ));
    let mixed = vec![org_added("a", "A"), org_added("b", "B")];
    assert!(matches!(
        store.push_many(mixed).await,
        Err(Error::Validation { .. })
    ));

    assert!(store.health().await);
}

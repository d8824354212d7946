//! Read-model query behavior: the filter algebra against real tables,
//! pagination and tombstone exclusion.

mod common;

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use stronghold::command::{AddHumanUser, CommandContext, Commands};
use stronghold::config::{EventStoreConfig, ProjectionConfig};
use stronghold::id::IdGenerator;
use stronghold::projection::{users, ProjectionEngine};
use stronghold::query::{Filter, Op, UserQueries};
use stronghold::store::{EventStore, PgEventStore};
use stronghold::types::{Pagination, Position};

use common::INSTANCE;

const WAIT: Duration = Duration::from_secs(5);

fn ctx() -> CommandContext {
    CommandContext::new(INSTANCE).with_org("org-1").with_user("admin")
}

async fn seed(pool: PgPool) -> (Commands, ProjectionEngine, Vec<String>, Position) {
    let store = Arc::new(
        PgEventStore::new(pool.clone(), EventStoreConfig::default())
            .await
            .unwrap(),
    );
    let commands = Commands::new(
        store as Arc<dyn EventStore>,
        Arc::new(IdGenerator::new(1).unwrap()),
    );
    let engine = ProjectionEngine::new(pool);

    let mut ids = Vec::new();
    let mut last = Position::genesis();
    for (username, first) in [
        ("ada", "Ada"),
        ("alan", "Alan"),
        ("grace", "Grace"),
        ("joan", "Joan"),
    ] {
        let (id, details) = commands
            .add_human_user(
                &ctx(),
                AddHumanUser {
                    username: username.to_owned(),
                    first_name: first.to_owned(),
                    last_name: "Tester".to_owned(),
                    email: format!("{username}@acme.test"),
                    ..AddHumanUser::default()
                },
            )
            .await
            .unwrap();
        ids.push(id);
        last = details.position;
    }

    (commands, engine, ids, last)
}

async fn run_users_projection(engine: &ProjectionEngine, target: Position) {
    let config = users::config();
    let config = ProjectionConfig::builder()
        .name(config.name)
        .tables(config.tables)
        .aggregate_types(config.aggregate_types)
        .interval(Duration::from_millis(50))
        .build();
    let handler = engine.register(config, users::UserProjection).unwrap();
    handler.start().await.unwrap();
    assert!(engine
        .wait_for_projection(users::NAME, "", target, WAIT)
        .await
        .unwrap());
    handler.stop().await;
}

#[sqlx::test]
async fn search_with_filters_and_pagination(pool: PgPool) {
    let (_commands, engine, _ids, last) = seed(pool.clone()).await;
    run_users_projection(&engine, last).await;

    let queries = UserQueries::new(pool);

    // Prefix filter.
    let a_people = queries
        .search(
            INSTANCE,
            Some(&Filter::condition("username", Op::StartsWith, "a")),
            Pagination::default(),
            false,
        )
        .await
        .unwrap();
    let names: Vec<&str> = a_people.iter().map(|user| user.username.as_str()).collect();
    assert_eq!(names, vec!["ada", "alan"]);

    // Composed group: (first_name ILIKE 'g%') OR (username = 'joan').
    let group = queries
        .search(
            INSTANCE,
            Some(&Filter::or(vec![
                Filter::condition("first_name", Op::ILike, "g%"),
                Filter::eq("username", "joan"),
            ])),
            Pagination::default(),
            false,
        )
        .await
        .unwrap();
    assert_eq!(group.len(), 2);

    // Pagination walks the stable order.
    let page_one = queries
        .search(INSTANCE, None, Pagination::new(0, 2), false)
        .await
        .unwrap();
    let page_two = queries
        .search(INSTANCE, None, Pagination::new(2, 2), false)
        .await
        .unwrap();
    assert_eq!(page_one.len(), 2);
    assert_eq!(page_two.len(), 2);
    assert_ne!(page_one[0].id, page_two[0].id);

    // Another instance sees nothing.
    let elsewhere = queries
        .search("inst-2", None, Pagination::default(), false)
        .await
        .unwrap();
    assert!(elsewhere.is_empty());
}

#[sqlx::test]
async fn tombstoned_users_are_hidden_unless_requested(pool: PgPool) {
    let (commands, engine, ids, _last) = seed(pool.clone()).await;
    let details = commands.remove_user(&ctx(), &ids[0]).await.unwrap();
    run_users_projection(&engine, details.position).await;

    let queries = UserQueries::new(pool);

    assert!(queries.by_id(INSTANCE, &ids[0]).await.unwrap().is_none());
    assert!(queries.by_username(INSTANCE, "ada").await.unwrap().is_none());

    let visible = queries
        .search(INSTANCE, None, Pagination::default(), false)
        .await
        .unwrap();
    assert_eq!(visible.len(), 3);

    // The tombstone row is still there for audit.
    let with_removed = queries
        .search(INSTANCE, None, Pagination::default(), true)
        .await
        .unwrap();
    assert_eq!(with_removed.len(), 4);

    // Lookups for missing rows return None, not an error.
    assert!(queries.by_id(INSTANCE, "no-such-user").await.unwrap().is_none());
}

//! Projection engine behavior: catch-up, poison-event quarantine, the
//! domain verification flow end to end, replica locking and the
//! handler lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};
use stronghold::command::{AddHumanUser, CommandContext, Commands};
use stronghold::config::{EventStoreConfig, ProjectionConfig};
use stronghold::error::Error;
use stronghold::event::{EventPayload, StoreEvent};
use stronghold::id::IdGenerator;
use stronghold::projection::{orgs, users, HandlerState, Projection, ProjectionEngine};
use stronghold::query::OrgQueries;
use stronghold::sql::pool as db;
use stronghold::store::{EventStore, PgEventStore};
use stronghold::types::Position;

use common::{org_added, INSTANCE};

const WAIT: Duration = Duration::from_secs(5);

async fn setup(pool: PgPool) -> (Arc<PgEventStore>, Commands, ProjectionEngine) {
    let store = Arc::new(
        PgEventStore::new(pool.clone(), EventStoreConfig::default())
            .await
            .unwrap(),
    );
    let commands = Commands::new(
        store.clone() as Arc<dyn EventStore>,
        Arc::new(IdGenerator::new(1).unwrap()),
    );
    (store, commands, ProjectionEngine::new(pool))
}

fn ctx() -> CommandContext {
    CommandContext::new(INSTANCE).with_org("org-1").with_user("admin")
}

fn fast(config: ProjectionConfig) -> ProjectionConfig {
    ProjectionConfig::builder()
        .name(config.name)
        .tables(config.tables)
        .aggregate_types(config.aggregate_types)
        .event_types(config.event_types)
        .interval(Duration::from_millis(50))
        .retry_delay(Duration::from_millis(50))
        .build()
}

/// A reducer that counts org additions and chokes on a designated name.
#[derive(Debug, Default)]
struct OrgCounter;

const POISON: &str = "poison";

#[async_trait]
impl Projection for OrgCounter {
    async fn init(&self, pool: &PgPool) -> Result<(), Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS org_counter
             (org_id TEXT PRIMARY KEY, name TEXT NOT NULL)",
        )
        .execute(pool)
        .await?;
        Ok(())
    }

    async fn reduce(
        &self,
        event: &StoreEvent,
        tx: &mut Transaction<'_, Postgres>,
    ) -> Result<(), Error> {
        if let EventPayload::OrgAdded(added) = &event.payload {
            if added.name == POISON {
                return Err(Error::validation("name", "reducer cannot digest this"));
            }
            sqlx::query(
                "INSERT INTO org_counter (org_id, name) VALUES ($1, $2)
                 ON CONFLICT (org_id) DO UPDATE SET name = $2",
            )
            .bind(&event.aggregate_id)
            .bind(&added.name)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    async fn reset(&self, tx: &mut Transaction<'_, Postgres>) -> Result<(), Error> {
        sqlx::query("TRUNCATE org_counter").execute(&mut **tx).await?;
        Ok(())
    }
}

#[sqlx::test]
async fn users_projection_catches_up(pool: PgPool) {
    let (_store, commands, engine) = setup(pool.clone()).await;

    let mut last = Position::genesis();
    for name in ["ada", "grace", "joan"] {
        let (_, details) = commands
            .add_human_user(
                &ctx(),
                AddHumanUser {
                    username: name.to_owned(),
                    first_name: name.to_owned(),
                    last_name: "Tester".to_owned(),
                    email: format!("{name}@acme.test"),
                    ..AddHumanUser::default()
                },
            )
            .await
            .unwrap();
        last = details.position;
    }

    let handler = engine
        .register(fast(users::config()), users::UserProjection)
        .unwrap();
    handler.start().await.unwrap();

    assert!(engine
        .wait_for_projection(users::NAME, "", last, WAIT)
        .await
        .unwrap());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM projections.users")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 3);
    assert!(engine.is_healthy(users::NAME, "", 0).await.unwrap());

    handler.stop().await;
}

#[sqlx::test]
async fn poison_events_are_quarantined_and_do_not_halt_the_batch(pool: PgPool) {
    let (store, _commands, engine) = setup(pool.clone()).await;

    store.push(org_added("o1", "Acme")).await.unwrap();
    store.push(org_added("o2", POISON)).await.unwrap();
    let good = store.push(org_added("o3", "Globex")).await.unwrap();

    let config = ProjectionConfig::builder()
        .name("org_counter")
        .tables(vec!["org_counter".to_owned()])
        .aggregate_types(vec!["org".to_owned()])
        .interval(Duration::from_millis(50))
        .build();
    let handler = engine.register(config, OrgCounter).unwrap();
    handler.start().await.unwrap();

    assert!(engine
        .wait_for_projection("org_counter", "", good.position, WAIT)
        .await
        .unwrap());
    handler.stop().await;

    // The good events landed, the poison one did not.
    let names: Vec<String> = sqlx::query_scalar("SELECT name FROM org_counter ORDER BY org_id")
        .fetch_all(&pool)
        .await
        .unwrap();
    assert_eq!(names, vec!["Acme".to_owned(), "Globex".to_owned()]);

    // One quarantine record, one failure so far.
    let failed = engine.failed_events("org_counter").await.unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failure_count, 1);
    assert!(failed[0].error.contains("cannot digest"));
    assert!(!failed[0].is_permanent(5));

    // The cursor moved past the quarantined event.
    let cursor = engine.projection_position("org_counter", "").await.unwrap();
    assert!(cursor >= good.position);
}

#[sqlx::test]
async fn domain_verification_flow_reaches_the_read_model(pool: PgPool) {
    let (_store, commands, engine) = setup(pool.clone()).await;

    let (org_id, _) = commands.add_organization(&ctx(), "Acme").await.unwrap();
    let (code, _) = commands
        .add_organization_domain(&ctx(), &org_id, "acme.test", "dns")
        .await
        .unwrap();
    commands
        .verify_organization_domain(&ctx(), &org_id, "acme.test", &code)
        .await
        .unwrap();
    let details = commands
        .set_primary_organization_domain(&ctx(), &org_id, "acme.test")
        .await
        .unwrap();

    let handler = engine
        .register(fast(orgs::config()), orgs::OrgProjection)
        .unwrap();
    handler.start().await.unwrap();
    assert!(engine
        .wait_for_projection(orgs::NAME, "", details.position, WAIT)
        .await
        .unwrap());
    handler.stop().await;

    let queries = OrgQueries::new(pool);
    let by_domain = queries
        .by_domain_global(INSTANCE, "acme.test")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_domain.id, org_id);

    let org = queries.by_id(INSTANCE, &org_id).await.unwrap().unwrap();
    assert_eq!(org.primary_domain.as_deref(), Some("acme.test"));
}

#[sqlx::test]
async fn advisory_lock_admits_one_replica_per_tick(pool: PgPool) {
    let key = db::advisory_lock_key("users", INSTANCE);

    let mut holder = pool.begin().await.unwrap();
    assert!(db::try_advisory_xact_lock(&mut holder, key).await.unwrap());

    let mut contender = pool.begin().await.unwrap();
    assert!(!db::try_advisory_xact_lock(&mut contender, key).await.unwrap());
    // A different projection name is a different lock.
    let other = db::advisory_lock_key("orgs", INSTANCE);
    assert!(db::try_advisory_xact_lock(&mut contender, other).await.unwrap());
    contender.commit().await.unwrap();

    // Commit releases the transaction-scoped lock.
    holder.commit().await.unwrap();
    let mut late = pool.begin().await.unwrap();
    assert!(db::try_advisory_xact_lock(&mut late, key).await.unwrap());
    late.rollback().await.unwrap();
}

#[sqlx::test]
async fn handler_lifecycle(pool: PgPool) {
    let (_store, _commands, engine) = setup(pool.clone()).await;
    let handler = engine
        .register(fast(users::config()), users::UserProjection)
        .unwrap();

    assert_eq!(handler.state(), HandlerState::Stopped);
    handler.start().await.unwrap();
    assert!(matches!(
        handler.state(),
        HandlerState::CatchUp | HandlerState::Live
    ));

    // Starting a running handler fails; registering the name twice fails.
    assert!(handler.start().await.is_err());
    assert!(engine
        .register(fast(users::config()), users::UserProjection)
        .is_err());

    handler.stop().await;
    assert_eq!(handler.state(), HandlerState::Stopped);
    // Stopping a stopped handler is a no-op.
    handler.stop().await;
    assert_eq!(handler.state(), HandlerState::Stopped);
}

#[sqlx::test]
async fn reducers_are_idempotent_under_replay(pool: PgPool) {
    let (store, commands, _engine) = setup(pool.clone()).await;

    let (user_id, _) = commands
        .add_human_user(
            &ctx(),
            AddHumanUser {
                username: "ada".to_owned(),
                first_name: "Ada".to_owned(),
                last_name: "Lovelace".to_owned(),
                email: "ada@acme.test".to_owned(),
                ..AddHumanUser::default()
            },
        )
        .await
        .unwrap();
    commands
        .change_email(&ctx(), &user_id, "ada@lovelace.test")
        .await
        .unwrap();

    let projection = users::UserProjection;
    projection.init(&pool).await.unwrap();

    let history = store
        .aggregate(INSTANCE, &stronghold::types::AggregateKind::User, &user_id, None)
        .await
        .unwrap()
        .unwrap();

    // Apply the whole history twice; the table state must not change.
    for _ in 0..2 {
        let mut tx = pool.begin().await.unwrap();
        for event in &history.events {
            projection.reduce(event, &mut tx).await.unwrap();
        }
        tx.commit().await.unwrap();
    }

    let (count, email): (i64, String) = sqlx::query_as(
        "SELECT COUNT(*) OVER (), email FROM projections.users WHERE instance_id = $1 AND id = $2",
    )
    .bind(INSTANCE)
    .bind(&user_id)
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(count, 1);
    assert_eq!(email, "ada@lovelace.test");
}

#[sqlx::test]
async fn wait_for_projection_times_out_honestly(pool: PgPool) {
    let (store, _commands, engine) = setup(pool.clone()).await;
    store.push(org_added("o1", "Acme")).await.unwrap();

    // No handler is running, so the cursor can never advance.
    let reached = engine
        .wait_for_projection("orgs", "", Position::new(1, 0), Duration::from_millis(200))
        .await
        .unwrap();
    assert!(!reached);
}

//! Permission aggregation over projected memberships and grants.

mod common;

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use stronghold::command::{AddHumanUser, AddProject, CommandContext, Commands};
use stronghold::config::{EventStoreConfig, ProjectionConfig};
use stronghold::id::IdGenerator;
use stronghold::permission::{PermissionContext, PermissionEngine, Requirement};
use stronghold::projection::{grants, members, users, ProjectionEngine};
use stronghold::store::{EventStore, PgEventStore};
use stronghold::types::Position;

use common::INSTANCE;

const WAIT: Duration = Duration::from_secs(5);

fn fast(config: ProjectionConfig) -> ProjectionConfig {
    ProjectionConfig::builder()
        .name(config.name)
        .tables(config.tables)
        .aggregate_types(config.aggregate_types)
        .event_types(config.event_types)
        .interval(Duration::from_millis(50))
        .build()
}

fn ctx() -> CommandContext {
    CommandContext::new(INSTANCE).with_org("org-1").with_user("admin")
}

async fn setup(pool: PgPool) -> (Commands, ProjectionEngine) {
    let store = Arc::new(
        PgEventStore::new(pool.clone(), EventStoreConfig::default())
            .await
            .unwrap(),
    );
    let commands = Commands::new(
        store as Arc<dyn EventStore>,
        Arc::new(IdGenerator::new(1).unwrap()),
    );
    (commands, ProjectionEngine::new(pool))
}

async fn drain(engine: &ProjectionEngine, names: &[&str], target: Position) {
    for name in names {
        assert!(engine
            .wait_for_projection(name, "", target, WAIT)
            .await
            .unwrap());
    }
}

#[sqlx::test]
async fn org_admin_manages_projects_only_in_their_org(pool: PgPool) {
    let (commands, engine) = setup(pool.clone()).await;

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
    let (org_id, _) = commands.add_organization(&ctx(), "Acme").await.unwrap();
    let details = commands
        .add_organization_member(&ctx(), &org_id, &user_id, vec!["ORG_ADMIN".to_owned()])
        .await
        .unwrap();

    let members_handler = engine
        .register(fast(members::config()), members::MemberProjection)
        .unwrap();
    let users_handler = engine
        .register(fast(users::config()), users::UserProjection)
        .unwrap();
    members_handler.start().await.unwrap();
    users_handler.start().await.unwrap();
    drain(&engine, &[members::NAME, users::NAME], details.position).await;

    let permissions = PermissionEngine::new(pool);

    // S4: the admin manages projects inside their org...
    let inside = permissions
        .check_permissions(
            &PermissionContext {
                user_id: user_id.clone(),
                instance_id: INSTANCE.to_owned(),
                org_id: Some(org_id.clone()),
                project_id: None,
            },
            &[Requirement::new("iam.project", "manage")],
        )
        .await
        .unwrap();
    assert!(inside.has_permission);
    assert_eq!(inside.matched_permissions.len(), 1);

    // ...but not in a different org.
    let outside = permissions
        .check_permissions(
            &PermissionContext {
                user_id: user_id.clone(),
                instance_id: INSTANCE.to_owned(),
                org_id: Some("other-org".to_owned()),
                project_id: None,
            },
            &[Requirement::new("iam.project", "manage")],
        )
        .await
        .unwrap();
    assert!(!outside.has_permission);
    assert!(outside.reason.is_some());

    // ORG_ADMIN reads users but does not manage orgs.
    let read_users = permissions
        .check_permissions(
            &PermissionContext {
                user_id: user_id.clone(),
                instance_id: INSTANCE.to_owned(),
                org_id: Some(org_id.clone()),
                project_id: None,
            },
            &[Requirement::new("iam.user", "read")],
        )
        .await
        .unwrap();
    assert!(read_users.has_permission);

    let manage_org = permissions
        .check_permissions(
            &PermissionContext {
                user_id,
                instance_id: INSTANCE.to_owned(),
                org_id: Some(org_id),
                project_id: None,
            },
            &[Requirement::new("iam.org", "manage")],
        )
        .await
        .unwrap();
    assert!(!manage_org.has_permission);

    members_handler.stop().await;
    users_handler.stop().await;
}

#[sqlx::test]
async fn user_grants_scope_project_roles_and_cache_is_transparent(pool: PgPool) {
    let (commands, engine) = setup(pool.clone()).await;

    let (user_id, _) = commands
        .add_human_user(
            &ctx(),
            AddHumanUser {
                username: "bob".to_owned(),
                first_name: "Bob".to_owned(),
                last_name: "Builder".to_owned(),
                email: "bob@acme.test".to_owned(),
                ..AddHumanUser::default()
            },
        )
        .await
        .unwrap();
    let (project_id, _) = commands
        .add_project(
            &ctx(),
            AddProject {
                name: "crm".to_owned(),
                ..AddProject::default()
            },
        )
        .await
        .unwrap();
    commands
        .add_project_role(&ctx(), &project_id, "billing.read", "Billing reader", None)
        .await
        .unwrap();
    let (_, details) = commands
        .add_user_grant(&ctx(), &user_id, &project_id, None, vec!["billing.read".to_owned()])
        .await
        .unwrap();

    let grants_handler = engine
        .register(fast(grants::config()), grants::UserGrantProjection)
        .unwrap();
    let users_handler = engine
        .register(fast(users::config()), users::UserProjection)
        .unwrap();
    grants_handler.start().await.unwrap();
    users_handler.start().await.unwrap();
    drain(&engine, &[grants::NAME, users::NAME], details.position).await;

    let permissions = PermissionEngine::new(pool);
    let ctx = PermissionContext {
        user_id: user_id.clone(),
        instance_id: INSTANCE.to_owned(),
        org_id: Some("org-1".to_owned()),
        project_id: Some(project_id.clone()),
    };

    // The project-defined role passes through, scoped to the project.
    let check = permissions
        .check_permissions(
            &ctx,
            &[Requirement::new("project.role", "billing.read")
                .condition("project", project_id.clone())],
        )
        .await
        .unwrap();
    assert!(check.has_permission);

    let other_project = permissions
        .check_permissions(
            &ctx,
            &[Requirement::new("project.role", "billing.read").condition("project", "p-other")],
        )
        .await
        .unwrap();
    assert!(!other_project.has_permission);

    // Determinism: a cold cache yields the same verdict as a warm one.
    let warm = permissions.my_permissions(&ctx).await.unwrap();
    permissions.clear_cache(&user_id, INSTANCE);
    let cold = permissions.my_permissions(&ctx).await.unwrap();
    assert_eq!(warm, cold);

    grants_handler.stop().await;
    users_handler.stop().await;
}

//! End-to-end authentication: command → projection → auth provider →
//! session and tokens.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sqlx::PgPool;
use stronghold::auth::{totp, AuthProvider, AuthRequest};
use stronghold::command::{AddHumanUser, CommandContext, Commands};
use stronghold::config::{
    EventStoreConfig, PasswordPolicy, ProjectionConfig, SessionConfig, TokenConfig,
};
use stronghold::error::Error;
use stronghold::id::IdGenerator;
use stronghold::kv::MemoryKvStore;
use stronghold::projection::{users, ProjectionEngine};
use stronghold::query::UserQueries;
use stronghold::session::SessionService;
use stronghold::token::{TokenService, TokenType};
use stronghold::store::{EventStore, PgEventStore};
use stronghold::types::Position;

use common::INSTANCE;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    commands: Commands,
    engine: ProjectionEngine,
    auth: AuthProvider,
    sessions: Arc<SessionService>,
    tokens: Arc<TokenService>,
}

async fn harness(pool: PgPool) -> Harness {
    let store = Arc::new(
        PgEventStore::new(pool.clone(), EventStoreConfig::default())
            .await
            .unwrap(),
    );
    let commands = Commands::new(
        store as Arc<dyn EventStore>,
        Arc::new(IdGenerator::new(1).unwrap()),
    );
    let engine = ProjectionEngine::new(pool.clone());

    let kv = Arc::new(MemoryKvStore::new());
    let sessions = Arc::new(SessionService::new(kv.clone(), SessionConfig::default()));
    let tokens = Arc::new(TokenService::new(
        TokenConfig::builder().secret("test-secret").build(),
        kv.clone(),
    ));
    let auth = AuthProvider::new(
        UserQueries::new(pool),
        sessions.clone(),
        tokens.clone(),
        kv,
        PasswordPolicy::default(),
    );

    Harness {
        commands,
        engine,
        auth,
        sessions,
        tokens,
    }
}

fn ctx() -> CommandContext {
    CommandContext::new(INSTANCE).with_org("org-1").with_user("admin")
}

fn fast_users() -> ProjectionConfig {
    let config = users::config();
    ProjectionConfig::builder()
        .name(config.name)
        .tables(config.tables)
        .aggregate_types(config.aggregate_types)
        .interval(Duration::from_millis(50))
        .build()
}

async fn add_user(harness: &Harness, username: &str, password: &str) -> (String, Position) {
    let (user_id, details) = harness
        .commands
        .add_human_user(
            &ctx(),
            AddHumanUser {
                username: username.to_owned(),
                first_name: "Ada".to_owned(),
                last_name: "Lovelace".to_owned(),
                email: format!("{username}@acme.test"),
                password: Some(password.to_owned()),
                ..AddHumanUser::default()
            },
        )
        .await
        .unwrap();
    (user_id, details.position)
}

fn request(username: &str, password: &str) -> AuthRequest {
    AuthRequest {
        username: username.to_owned(),
        password: password.to_owned(),
        instance_id: INSTANCE.to_owned(),
        mfa_code: None,
        metadata: Value::Null,
    }
}

#[sqlx::test]
async fn password_login_mints_session_and_tokens(pool: PgPool) {
    let harness = harness(pool).await;
    let (user_id, position) = add_user(&harness, "ada", "Sup3rSecret").await;

    let handler = harness
        .engine
        .register(fast_users(), users::UserProjection)
        .unwrap();
    handler.start().await.unwrap();
    assert!(harness
        .engine
        .wait_for_projection(users::NAME, "", position, WAIT)
        .await
        .unwrap());

    // Wrong password and unknown user are indistinguishable.
    assert!(matches!(
        harness.auth.authenticate(&request("ada", "wrong")).await,
        Err(Error::InvalidCredentials)
    ));
    assert!(matches!(
        harness.auth.authenticate(&request("nobody", "Sup3rSecret")).await,
        Err(Error::InvalidCredentials)
    ));

    let success = harness
        .auth
        .authenticate(&request("ada", "Sup3rSecret"))
        .await
        .unwrap();
    assert_eq!(success.user_id, user_id);
    assert!(harness.sessions.is_valid(&success.session_id).await.unwrap());

    let claims = harness
        .tokens
        .verify_token(&success.tokens.access_token)
        .await
        .unwrap();
    assert_eq!(claims.sub, user_id);
    assert_eq!(claims.token_type, TokenType::Access);
    assert_eq!(claims.instance_id, INSTANCE);
    assert_eq!(claims.org_id.as_deref(), Some("org-1"));

    handler.stop().await;
}

#[sqlx::test]
async fn mfa_gate_requires_a_code_once_verified(pool: PgPool) {
    let harness = harness(pool).await;
    let (user_id, _) = add_user(&harness, "ada", "Sup3rSecret").await;

    let (secret, _) = harness.commands.add_totp(&ctx(), &user_id).await.unwrap();
    let code = totp::generate_code(&secret).unwrap();
    let details = harness
        .commands
        .verify_totp(&ctx(), &user_id, &code)
        .await
        .unwrap();

    let handler = harness
        .engine
        .register(fast_users(), users::UserProjection)
        .unwrap();
    handler.start().await.unwrap();
    assert!(harness
        .engine
        .wait_for_projection(users::NAME, "", details.position, WAIT)
        .await
        .unwrap());

    // No code: the flow pauses with a continuation token.
    match harness.auth.authenticate(&request("ada", "Sup3rSecret")).await {
        Err(Error::MfaRequired { mfa_token }) => assert!(!mfa_token.is_empty()),
        other => panic!("expected MFA gate, got {other:?}"),
    }

    // A malformed code is rejected.
    let mut bad = request("ada", "Sup3rSecret");
    bad.mfa_code = Some("banana".to_owned());
    assert!(matches!(
        harness.auth.authenticate(&bad).await,
        Err(Error::InvalidCredentials)
    ));

    let mut good = request("ada", "Sup3rSecret");
    good.mfa_code = Some(totp::generate_code(&secret).unwrap());
    let success = harness.auth.authenticate(&good).await.unwrap();
    assert_eq!(success.user_id, user_id);

    handler.stop().await;
}

#[sqlx::test]
async fn deactivated_users_cannot_authenticate(pool: PgPool) {
    let harness = harness(pool).await;
    let (user_id, _) = add_user(&harness, "ada", "Sup3rSecret").await;
    let details = harness.commands.deactivate_user(&ctx(), &user_id).await.unwrap();

    let handler = harness
        .engine
        .register(fast_users(), users::UserProjection)
        .unwrap();
    handler.start().await.unwrap();
    assert!(harness
        .engine
        .wait_for_projection(users::NAME, "", details.position, WAIT)
        .await
        .unwrap());

    assert!(matches!(
        harness.auth.authenticate(&request("ada", "Sup3rSecret")).await,
        Err(Error::InvalidCredentials)
    ));

    handler.stop().await;
}

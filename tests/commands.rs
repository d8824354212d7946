//! Command-layer behavior, driven against the in-memory eventstore.

mod common;

use std::sync::Arc;

use stronghold::auth::totp;
use stronghold::command::{
    AddHumanUser, AddProject, CommandContext, Commands, IdpCallback, OidcAppConfig, ProfileChanges,
    SamlRequestInput,
};
use stronghold::error::Error;
use stronghold::event::EventPayload;
use stronghold::id::IdGenerator;
use stronghold::store::{EventStore, MemoryEventStore};
use stronghold::types::AggregateKind;

use common::INSTANCE;

fn commands() -> (Commands, Arc<MemoryEventStore>) {
    let store = Arc::new(MemoryEventStore::default());
    let commands = Commands::new(
        store.clone() as Arc<dyn EventStore>,
        Arc::new(IdGenerator::new(1).unwrap()),
    );
    (commands, store)
}

fn ctx() -> CommandContext {
    CommandContext::new(INSTANCE).with_org("org-1").with_user("admin")
}

fn human(username: &str) -> AddHumanUser {
    AddHumanUser {
        username: username.to_owned(),
        first_name: "Ada".to_owned(),
        last_name: "Lovelace".to_owned(),
        email: format!("{username}@acme.test"),
        password: Some("Sup3rSecret".to_owned()),
        ..AddHumanUser::default()
    }
}

#[tokio::test]
async fn add_human_user_emits_added_event_with_hashed_password() {
    let (commands, store) = commands();
    let (user_id, details) = commands.add_human_user(&ctx(), human("ada")).await.unwrap();

    assert_eq!(details.version, 1);
    let history = store
        .aggregate(INSTANCE, &AggregateKind::User, &user_id, None)
        .await
        .unwrap()
        .unwrap();
    match &history.events[0].payload {
        EventPayload::HumanUserAdded(added) => {
            assert_eq!(added.username, "ada");
            let hash = added.password_hash.as_deref().unwrap();
            assert!(hash.starts_with("$argon2"));
            assert!(!hash.contains("Sup3rSecret"));
        }
        other => panic!("unexpected payload {other:?}"),
    }
    assert_eq!(history.events[0].editor, "admin");
    assert_eq!(history.events[0].resource_owner, "org-1");
}

#[tokio::test]
async fn duplicate_usernames_are_rejected_until_the_user_is_removed() {
    let (commands, _) = commands();
    let (user_id, _) = commands.add_human_user(&ctx(), human("ada")).await.unwrap();

    let error = commands.add_human_user(&ctx(), human("ada")).await.unwrap_err();
    assert!(matches!(error, Error::Validation { ref field, .. } if field == "username"));

    commands.remove_user(&ctx(), &user_id).await.unwrap();
    commands.add_human_user(&ctx(), human("ada")).await.unwrap();
}

#[tokio::test]
async fn weak_passwords_fail_the_policy() {
    let (commands, _) = commands();
    let mut input = human("ada");
    input.password = Some("weak".to_owned());
    assert!(matches!(
        commands.add_human_user(&ctx(), input).await,
        Err(Error::PasswordPolicy { .. })
    ));
}

#[tokio::test]
async fn user_lifecycle_transitions_are_validated() {
    let (commands, _) = commands();
    let (user_id, _) = commands.add_human_user(&ctx(), human("ada")).await.unwrap();

    commands.deactivate_user(&ctx(), &user_id).await.unwrap();
    // Deactivating twice is invalid.
    assert!(commands.deactivate_user(&ctx(), &user_id).await.is_err());
    commands.reactivate_user(&ctx(), &user_id).await.unwrap();

    commands.lock_user(&ctx(), &user_id).await.unwrap();
    assert!(commands.lock_user(&ctx(), &user_id).await.is_err());
    commands.unlock_user(&ctx(), &user_id).await.unwrap();

    commands.remove_user(&ctx(), &user_id).await.unwrap();
    assert!(matches!(
        commands.change_email(&ctx(), &user_id, "new@acme.test").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn profile_changes_require_at_least_one_field() {
    let (commands, _) = commands();
    let (user_id, _) = commands.add_human_user(&ctx(), human("ada")).await.unwrap();

    assert!(commands
        .change_profile(&ctx(), &user_id, ProfileChanges::default())
        .await
        .is_err());

    let details = commands
        .change_profile(
            &ctx(),
            &user_id,
            ProfileChanges {
                display_name: Some("Countess".to_owned()),
                ..ProfileChanges::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(details.version, 2);
}

#[tokio::test]
async fn totp_enrollment_flow() {
    let (commands, _) = commands();
    let (user_id, _) = commands.add_human_user(&ctx(), human("ada")).await.unwrap();

    let (secret, _) = commands.add_totp(&ctx(), &user_id).await.unwrap();
    assert!(commands
        .verify_totp(&ctx(), &user_id, "000000")
        .await
        .is_err());

    let code = totp::generate_code(&secret).unwrap();
    commands.verify_totp(&ctx(), &user_id, &code).await.unwrap();
    // Re-enrolling a verified TOTP fails.
    assert!(commands.add_totp(&ctx(), &user_id).await.is_err());
}

#[tokio::test]
async fn domain_verification_flow() {
    let (commands, _) = commands();
    let (org_id, _) = commands.add_organization(&ctx(), "Acme").await.unwrap();

    let (code, _) = commands
        .add_organization_domain(&ctx(), &org_id, "acme.test", "dns")
        .await
        .unwrap();

    // Primary requires a verified domain; a wrong code never verifies.
    assert!(commands
        .set_primary_organization_domain(&ctx(), &org_id, "acme.test")
        .await
        .is_err());
    assert!(commands
        .verify_organization_domain(&ctx(), &org_id, "acme.test", "wrong")
        .await
        .is_err());

    commands
        .verify_organization_domain(&ctx(), &org_id, "acme.test", &code)
        .await
        .unwrap();
    commands
        .set_primary_organization_domain(&ctx(), &org_id, "acme.test")
        .await
        .unwrap();

    // The primary domain cannot be dropped.
    assert!(commands
        .remove_organization_domain(&ctx(), &org_id, "acme.test")
        .await
        .is_err());
}

#[tokio::test]
async fn verified_domains_are_exclusive_across_orgs() {
    let (commands, _) = commands();
    let (org_a, _) = commands.add_organization(&ctx(), "A").await.unwrap();
    let (org_b, _) = commands.add_organization(&ctx(), "B").await.unwrap();

    let (code_a, _) = commands
        .add_organization_domain(&ctx(), &org_a, "shared.test", "dns")
        .await
        .unwrap();
    let (code_b, _) = commands
        .add_organization_domain(&ctx(), &org_b, "shared.test", "http")
        .await
        .unwrap();

    commands
        .verify_organization_domain(&ctx(), &org_a, "shared.test", &code_a)
        .await
        .unwrap();
    let error = commands
        .verify_organization_domain(&ctx(), &org_b, "shared.test", &code_b)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Validation { ref field, .. } if field == "domain"));
}

#[tokio::test]
async fn project_grants_are_limited_to_defined_roles() {
    let (commands, _) = commands();
    let (org_id, _) = commands.add_organization(&ctx(), "Partner").await.unwrap();
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
        .add_project_role(&ctx(), &project_id, "reader", "Reader", None)
        .await
        .unwrap();

    assert!(commands
        .add_project_grant(&ctx(), &project_id, &org_id, vec!["writer".to_owned()])
        .await
        .is_err());

    let (grant_id, _) = commands
        .add_project_grant(&ctx(), &project_id, &org_id, vec!["reader".to_owned()])
        .await
        .unwrap();

    // A user grant through the project grant may only use delegated roles.
    let (user_id, _) = commands.add_human_user(&ctx(), human("bob")).await.unwrap();
    assert!(commands
        .add_user_grant(
            &ctx(),
            &user_id,
            &project_id,
            Some(grant_id.clone()),
            vec!["writer".to_owned()],
        )
        .await
        .is_err());
    commands
        .add_user_grant(
            &ctx(),
            &user_id,
            &project_id,
            Some(grant_id),
            vec!["reader".to_owned()],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn oidc_app_returns_secret_once_and_stores_only_the_digest() {
    let (commands, store) = commands();
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

    let created = commands
        .add_oidc_app(
            &ctx(),
            &project_id,
            "web",
            OidcAppConfig {
                redirect_uris: vec!["https://app.acme.test/cb".to_owned()],
                ..OidcAppConfig::default()
            },
        )
        .await
        .unwrap();

    let secret = created.client_secret.clone().unwrap();
    let history = store
        .aggregate(INSTANCE, &AggregateKind::Application, &created.app_id, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(history.events.len(), 2);
    match &history.events[1].payload {
        EventPayload::OidcConfigChanged(config) => {
            let digest = config.client_secret_digest.as_deref().unwrap();
            assert_ne!(digest, secret);
            assert_eq!(digest.len(), 64);
        }
        other => panic!("unexpected payload {other:?}"),
    }

    // Rotation mints a different secret.
    let (rotated, _) = commands
        .regenerate_app_client_secret(&ctx(), &created.app_id)
        .await
        .unwrap();
    assert_ne!(rotated, secret);
}

#[tokio::test]
async fn idp_intent_flow_checks_state() {
    let (commands, _) = commands();
    let (intent, _) = commands
        .start_idp_intent(&ctx(), "github", "https://ok", "https://fail")
        .await
        .unwrap();

    let found = commands
        .idp_intent_by_state(&ctx(), &intent.state)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, intent.id);
    assert!(commands
        .idp_intent_by_state(&ctx(), "bogus")
        .await
        .unwrap()
        .is_none());

    // Wrong state is an authorization failure, not a validation issue.
    let error = commands
        .handle_oauth_callback(
            &ctx(),
            &intent.id,
            IdpCallback {
                state: "forged".to_owned(),
                idp_user_id: "gh-1".to_owned(),
                ..IdpCallback::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(error, Error::PermissionDenied(_)));

    commands
        .handle_oauth_callback(
            &ctx(),
            &intent.id,
            IdpCallback {
                state: intent.state.clone(),
                idp_user_id: "gh-1".to_owned(),
                idp_username: "octocat".to_owned(),
                ..IdpCallback::default()
            },
        )
        .await
        .unwrap();

    // A settled intent cannot be completed again.
    assert!(commands
        .handle_oidc_callback(
            &ctx(),
            &intent.id,
            IdpCallback {
                state: intent.state.clone(),
                idp_user_id: "gh-1".to_owned(),
                ..IdpCallback::default()
            },
        )
        .await
        .is_err());
}

#[tokio::test]
async fn saml_request_lifecycle() {
    let (commands, _) = commands();
    let (request_id, _) = commands
        .add_saml_request(
            &ctx(),
            SamlRequestInput {
                login_client: "login-ui".to_owned(),
                issuer: "https://sp.example".to_owned(),
                acs_url: "https://sp.example/acs".to_owned(),
                relay_state: Some("rs".to_owned()),
                binding: "post".to_owned(),
            },
        )
        .await
        .unwrap();

    // A response before a session is linked is invalid.
    assert!(commands.handle_saml_response(&ctx(), &request_id).await.is_err());

    commands
        .link_session_to_saml_request(&ctx(), &request_id, "sess-1", "admin")
        .await
        .unwrap();
    let issued = commands.handle_saml_response(&ctx(), &request_id).await.unwrap();
    assert_eq!(issued.user_id, "admin");
    assert_eq!(issued.acs_url, "https://sp.example/acs");
    assert_eq!(issued.relay_state.as_deref(), Some("rs"));

    // The session's owner can terminate it; a stranger cannot.
    let stranger = CommandContext::new(INSTANCE).with_user("mallory");
    let error = commands
        .terminate_saml_session(&stranger, &issued.saml_session_id)
        .await
        .unwrap_err();
    assert!(matches!(error, Error::PermissionDenied(ref code) if code == "SAML-perm01"));

    commands
        .terminate_saml_session(&ctx(), &issued.saml_session_id)
        .await
        .unwrap();
    assert!(commands
        .terminate_saml_session(&ctx(), &issued.saml_session_id)
        .await
        .is_err());
}

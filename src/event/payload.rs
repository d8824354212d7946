//! Typed event payloads.
//!
//! Each `event_type` has exactly one payload struct; the whole set forms
//! the [`EventPayload`] union. Events read from the log with an unknown
//! type, or whose body no longer matches the current schema, decode to
//! [`EventPayload::Opaque`] and are skipped by reducers. Payload schema
//! changes must stay backward compatible; removals require a new event
//! type (and a `revision` bump).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{AggregateKind, AppKind};

// ---------------------------------------------------------------------------
// user aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanUserAdded {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    /// Argon2 PHC string; never the clear password.
    #[serde(default)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub preferred_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanProfileChanged {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub preferred_language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanEmailChanged {
    pub email: String,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanPhoneChanged {
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanPhoneRemoved {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsernameChanged {
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanPasswordChanged {
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDeactivated {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserReactivated {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserLocked {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserUnlocked {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRemoved {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineKeyAdded {
    pub key_id: String,
    pub key_type: String,
    pub public_key: String,
    #[serde(default)]
    pub expiration_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineKeyRemoved {
    pub key_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanOtpAdded {
    /// Base32 TOTP secret.
    pub secret: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanOtpVerified {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanOtpRemoved {}

// ---------------------------------------------------------------------------
// org aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgAdded {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgChanged {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgDeactivated {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgReactivated {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgRemoved {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgDomainAdded {
    pub domain: String,
    /// `http` or `dns`.
    pub validation_type: String,
    /// SHA-256 digest of the validation code handed to the caller.
    #[serde(default)]
    pub validation_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgDomainVerified {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgDomainPrimarySet {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrgDomainRemoved {
    pub domain: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberAdded {
    pub user_id: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberChanged {
    pub user_id: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberRemoved {
    pub user_id: String,
}

// ---------------------------------------------------------------------------
// project aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectAdded {
    pub name: String,
    #[serde(default)]
    pub project_role_assertion: bool,
    #[serde(default)]
    pub project_role_check: bool,
    #[serde(default)]
    pub private_labeling: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectChanged {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub project_role_assertion: Option<bool>,
    #[serde(default)]
    pub project_role_check: Option<bool>,
    #[serde(default)]
    pub private_labeling: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectDeactivated {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectReactivated {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRemoved {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRoleAdded {
    pub role_key: String,
    pub display_name: String,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRoleRemoved {
    pub role_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectGrantAdded {
    pub grant_id: String,
    pub granted_org_id: String,
    pub role_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectGrantChanged {
    pub grant_id: String,
    pub role_keys: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectGrantRemoved {
    pub grant_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectGrantMemberAdded {
    pub grant_id: String,
    pub user_id: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectGrantMemberChanged {
    pub grant_id: String,
    pub user_id: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectGrantMemberRemoved {
    pub grant_id: String,
    pub user_id: String,
}

// ---------------------------------------------------------------------------
// application aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationAdded {
    pub project_id: String,
    pub name: String,
    pub kind: AppKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationChanged {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OidcConfigChanged {
    #[serde(default)]
    pub redirect_uris: Vec<String>,
    #[serde(default)]
    pub post_logout_redirect_uris: Vec<String>,
    #[serde(default)]
    pub response_types: Vec<String>,
    #[serde(default)]
    pub grant_types: Vec<String>,
    #[serde(default)]
    pub app_type: Option<String>,
    #[serde(default)]
    pub auth_method: Option<String>,
    #[serde(default)]
    pub dev_mode: bool,
    #[serde(default)]
    pub client_id: Option<String>,
    /// SHA-256 digest; the clear secret is returned to the caller once.
    #[serde(default)]
    pub client_secret_digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfigChanged {
    #[serde(default)]
    pub auth_method: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret_digest: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlConfigChanged {
    pub entity_id: String,
    pub acs_url: String,
    #[serde(default)]
    pub certificate: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSecretChanged {
    pub client_secret_digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationDeactivated {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationReactivated {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRemoved {}

// ---------------------------------------------------------------------------
// user grant aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGrantAdded {
    pub user_id: String,
    pub project_id: String,
    #[serde(default)]
    pub project_grant_id: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGrantChanged {
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserGrantRemoved {}

// ---------------------------------------------------------------------------
// idp intent aggregate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpIntentStarted {
    pub idp_id: String,
    pub success_url: String,
    pub failure_url: String,
    /// Opaque state round-tripped through the external provider.
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpIntentSucceeded {
    pub idp_user_id: String,
    pub idp_username: String,
    /// Local user the intent resolved to, when linked.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Canonical parsed claims from the provider, not the wire form.
    #[serde(default)]
    pub raw_information: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdpIntentFailed {
    pub reason: String,
}

// ---------------------------------------------------------------------------
// saml request / session aggregates
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlRequestAdded {
    pub login_client: String,
    pub issuer: String,
    pub acs_url: String,
    #[serde(default)]
    pub relay_state: Option<String>,
    pub binding: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlRequestSessionLinked {
    pub session_id: String,
    pub user_id: String,
    pub authenticated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlRequestSucceeded {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlRequestFailed {
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlSessionAdded {
    pub user_id: String,
    pub session_id: String,
    pub entity_id: String,
    #[serde(default)]
    pub audience: Vec<String>,
    pub expiration: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamlSessionTerminated {}

// ---------------------------------------------------------------------------
// the union
// ---------------------------------------------------------------------------

macro_rules! event_payloads {
    ($($variant:ident($ty:ty) => ($event_type:literal, $kind:expr, $revision:literal),)+) => {
        /// Every known event payload, plus the opaque fallback.
        #[derive(Debug, Clone, PartialEq)]
        pub enum EventPayload {
            $($variant($ty),)+
            /// An event type this build does not know (or whose body no
            /// longer decodes). Kept readable, skipped by reducers.
            Opaque { event_type: String, payload: Value },
        }

        impl EventPayload {
            /// The namespaced event type string persisted in the log.
            pub fn event_type(&self) -> String {
                match self {
                    $(Self::$variant(_) => $event_type.to_owned(),)+
                    Self::Opaque { event_type, .. } => event_type.clone(),
                }
            }

            /// The aggregate type owning this event.
            pub fn aggregate_kind(&self) -> AggregateKind {
                match self {
                    $(Self::$variant(_) => $kind,)+
                    Self::Opaque { event_type, .. } => {
                        AggregateKind::from(event_type.split('.').next().unwrap_or_default())
                    }
                }
            }

            /// Schema version of the payload.
            pub fn revision(&self) -> i16 {
                match self {
                    $(Self::$variant(_) => $revision,)+
                    Self::Opaque { .. } => 1,
                }
            }

            /// Serializes the payload body for persistence.
            pub fn to_json(&self) -> serde_json::Result<Value> {
                match self {
                    $(Self::$variant(inner) => serde_json::to_value(inner),)+
                    Self::Opaque { payload, .. } => Ok(payload.clone()),
                }
            }

            /// Decodes a stored `(event_type, body)` pair. Unknown types
            /// and bodies that fail to decode become [`Self::Opaque`].
            pub fn from_parts(event_type: &str, payload: Value) -> Self {
                match event_type {
                    $($event_type => match serde_json::from_value::<$ty>(payload.clone()) {
                        Ok(inner) => Self::$variant(inner),
                        Err(_) => Self::Opaque {
                            event_type: event_type.to_owned(),
                            payload,
                        },
                    },)+
                    _ => Self::Opaque {
                        event_type: event_type.to_owned(),
                        payload,
                    },
                }
            }
        }
    };
}

event_payloads! {
    HumanUserAdded(HumanUserAdded) => ("user.human.added", AggregateKind::User, 1),
    HumanProfileChanged(HumanProfileChanged) => ("user.human.profile.changed", AggregateKind::User, 1),
    HumanEmailChanged(HumanEmailChanged) => ("user.human.email.changed", AggregateKind::User, 1),
    HumanPhoneChanged(HumanPhoneChanged) => ("user.human.phone.changed", AggregateKind::User, 1),
    HumanPhoneRemoved(HumanPhoneRemoved) => ("user.human.phone.removed", AggregateKind::User, 1),
    UsernameChanged(UsernameChanged) => ("user.username.changed", AggregateKind::User, 1),
    HumanPasswordChanged(HumanPasswordChanged) => ("user.human.password.changed", AggregateKind::User, 1),
    UserDeactivated(UserDeactivated) => ("user.deactivated", AggregateKind::User, 1),
    UserReactivated(UserReactivated) => ("user.reactivated", AggregateKind::User, 1),
    UserLocked(UserLocked) => ("user.locked", AggregateKind::User, 1),
    UserUnlocked(UserUnlocked) => ("user.unlocked", AggregateKind::User, 1),
    UserRemoved(UserRemoved) => ("user.removed", AggregateKind::User, 1),
    MachineKeyAdded(MachineKeyAdded) => ("user.machine.key.added", AggregateKind::User, 1),
    MachineKeyRemoved(MachineKeyRemoved) => ("user.machine.key.removed", AggregateKind::User, 1),
    HumanOtpAdded(HumanOtpAdded) => ("user.human.mfa.otp.added", AggregateKind::User, 1),
    HumanOtpVerified(HumanOtpVerified) => ("user.human.mfa.otp.verified", AggregateKind::User, 1),
    HumanOtpRemoved(HumanOtpRemoved) => ("user.human.mfa.otp.removed", AggregateKind::User, 1),

    OrgAdded(OrgAdded) => ("org.added", AggregateKind::Org, 1),
    OrgChanged(OrgChanged) => ("org.changed", AggregateKind::Org, 1),
    OrgDeactivated(OrgDeactivated) => ("org.deactivated", AggregateKind::Org, 1),
    OrgReactivated(OrgReactivated) => ("org.reactivated", AggregateKind::Org, 1),
    OrgRemoved(OrgRemoved) => ("org.removed", AggregateKind::Org, 1),
    OrgDomainAdded(OrgDomainAdded) => ("org.domain.added", AggregateKind::Org, 1),
    OrgDomainVerified(OrgDomainVerified) => ("org.domain.verified", AggregateKind::Org, 1),
    OrgDomainPrimarySet(OrgDomainPrimarySet) => ("org.domain.primary.set", AggregateKind::Org, 1),
    OrgDomainRemoved(OrgDomainRemoved) => ("org.domain.removed", AggregateKind::Org, 1),
    OrgMemberAdded(MemberAdded) => ("org.member.added", AggregateKind::Org, 1),
    OrgMemberChanged(MemberChanged) => ("org.member.changed", AggregateKind::Org, 1),
    OrgMemberRemoved(MemberRemoved) => ("org.member.removed", AggregateKind::Org, 1),

    InstanceMemberAdded(MemberAdded) => ("instance.member.added", AggregateKind::Instance, 1),
    InstanceMemberChanged(MemberChanged) => ("instance.member.changed", AggregateKind::Instance, 1),
    InstanceMemberRemoved(MemberRemoved) => ("instance.member.removed", AggregateKind::Instance, 1),

    ProjectAdded(ProjectAdded) => ("project.added", AggregateKind::Project, 1),
    ProjectChanged(ProjectChanged) => ("project.changed", AggregateKind::Project, 1),
    ProjectDeactivated(ProjectDeactivated) => ("project.deactivated", AggregateKind::Project, 1),
    ProjectReactivated(ProjectReactivated) => ("project.reactivated", AggregateKind::Project, 1),
    ProjectRemoved(ProjectRemoved) => ("project.removed", AggregateKind::Project, 1),
    ProjectRoleAdded(ProjectRoleAdded) => ("project.role.added", AggregateKind::Project, 1),
    ProjectRoleRemoved(ProjectRoleRemoved) => ("project.role.removed", AggregateKind::Project, 1),
    ProjectMemberAdded(MemberAdded) => ("project.member.added", AggregateKind::Project, 1),
    ProjectMemberChanged(MemberChanged) => ("project.member.changed", AggregateKind::Project, 1),
    ProjectMemberRemoved(MemberRemoved) => ("project.member.removed", AggregateKind::Project, 1),
    ProjectGrantAdded(ProjectGrantAdded) => ("project.grant.added", AggregateKind::Project, 1),
    ProjectGrantChanged(ProjectGrantChanged) => ("project.grant.changed", AggregateKind::Project, 1),
    ProjectGrantRemoved(ProjectGrantRemoved) => ("project.grant.removed", AggregateKind::Project, 1),
    ProjectGrantMemberAdded(ProjectGrantMemberAdded) => ("project.grant.member.added", AggregateKind::Project, 1),
    ProjectGrantMemberChanged(ProjectGrantMemberChanged) => ("project.grant.member.changed", AggregateKind::Project, 1),
    ProjectGrantMemberRemoved(ProjectGrantMemberRemoved) => ("project.grant.member.removed", AggregateKind::Project, 1),

    ApplicationAdded(ApplicationAdded) => ("application.added", AggregateKind::Application, 1),
    ApplicationChanged(ApplicationChanged) => ("application.changed", AggregateKind::Application, 1),
    OidcConfigChanged(OidcConfigChanged) => ("application.oidc.config.changed", AggregateKind::Application, 1),
    ApiConfigChanged(ApiConfigChanged) => ("application.api.config.changed", AggregateKind::Application, 1),
    SamlConfigChanged(SamlConfigChanged) => ("application.saml.config.changed", AggregateKind::Application, 1),
    ApplicationSecretChanged(ApplicationSecretChanged) => ("application.secret.changed", AggregateKind::Application, 1),
    ApplicationDeactivated(ApplicationDeactivated) => ("application.deactivated", AggregateKind::Application, 1),
    ApplicationReactivated(ApplicationReactivated) => ("application.reactivated", AggregateKind::Application, 1),
    ApplicationRemoved(ApplicationRemoved) => ("application.removed", AggregateKind::Application, 1),

    UserGrantAdded(UserGrantAdded) => ("user_grant.added", AggregateKind::UserGrant, 1),
    UserGrantChanged(UserGrantChanged) => ("user_grant.changed", AggregateKind::UserGrant, 1),
    UserGrantRemoved(UserGrantRemoved) => ("user_grant.removed", AggregateKind::UserGrant, 1),

    IdpIntentStarted(IdpIntentStarted) => ("idp_intent.started", AggregateKind::IdpIntent, 1),
    IdpIntentSucceeded(IdpIntentSucceeded) => ("idp_intent.succeeded", AggregateKind::IdpIntent, 1),
    IdpIntentFailed(IdpIntentFailed) => ("idp_intent.failed", AggregateKind::IdpIntent, 1),

    SamlRequestAdded(SamlRequestAdded) => ("saml_request.added", AggregateKind::SamlRequest, 1),
    SamlRequestSessionLinked(SamlRequestSessionLinked) => ("saml_request.session.linked", AggregateKind::SamlRequest, 1),
    SamlRequestSucceeded(SamlRequestSucceeded) => ("saml_request.succeeded", AggregateKind::SamlRequest, 1),
    SamlRequestFailed(SamlRequestFailed) => ("saml_request.failed", AggregateKind::SamlRequest, 1),

    SamlSessionAdded(SamlSessionAdded) => ("saml_session.added", AggregateKind::SamlSession, 1),
    SamlSessionTerminated(SamlSessionTerminated) => ("saml_session.terminated", AggregateKind::SamlSession, 1),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_payloads_round_trip() {
        let payload = EventPayload::OrgAdded(OrgAdded {
            name: "Acme".to_owned(),
        });
        let body = payload.to_json().unwrap();
        let decoded = EventPayload::from_parts("org.added", body);
        assert_eq!(decoded, payload);
    }

    #[test]
    fn unknown_event_type_decodes_to_opaque() {
        let body = serde_json::json!({"anything": true});
        let decoded = EventPayload::from_parts("quota.notified", body.clone());
        match decoded {
            EventPayload::Opaque { event_type, payload } => {
                assert_eq!(event_type, "quota.notified");
                assert_eq!(payload, body);
            }
            other => panic!("expected opaque, got {other:?}"),
        }
    }

    #[test]
    fn undecodable_body_falls_back_to_opaque() {
        let body = serde_json::json!({"name": 42});
        match EventPayload::from_parts("org.added", body) {
            EventPayload::Opaque { event_type, .. } => assert_eq!(event_type, "org.added"),
            other => panic!("expected opaque, got {other:?}"),
        }
    }

    #[test]
    fn aggregate_kind_follows_event_type() {
        let payload = EventPayload::SamlSessionTerminated(SamlSessionTerminated {});
        assert_eq!(payload.aggregate_kind(), AggregateKind::SamlSession);
        assert_eq!(payload.event_type(), "saml_session.terminated");
        assert_eq!(payload.revision(), 1);

        let opaque = EventPayload::Opaque {
            event_type: "user.legacy".to_owned(),
            payload: Value::Null,
        };
        assert_eq!(opaque.aggregate_kind(), AggregateKind::User);
    }
}

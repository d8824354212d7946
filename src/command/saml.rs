//! SAML request and session commands.
//!
//! Requests and assertions cross the wire as XML handled by the
//! transport layer; the core works on the canonical parsed shape
//! (issuer, ACS URL, relay state, binding) and tracks the lifecycle:
//! added → session linked → succeeded/failed, plus the SAML session
//! spawned on success.

use chrono::{Duration, Utc};

use crate::command::{require, CommandContext, Commands, ObjectDetails};
use crate::error::{Error, Result};
use crate::event::{
    EventPayload, SamlRequestAdded, SamlRequestFailed, SamlRequestSessionLinked,
    SamlRequestSucceeded, SamlSessionAdded, SamlSessionTerminated, StoreEvent,
};
use crate::types::AggregateKind;

/// Lifetime of a SAML session minted on a successful response.
const SAML_SESSION_LIFETIME_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamlRequestStatus {
    Added,
    SessionLinked,
    Succeeded,
    Failed,
}

/// Canonical parsed authentication request.
#[derive(Debug, Clone, Default)]
pub struct SamlRequestInput {
    /// The client driving the login UI.
    pub login_client: String,
    /// The service provider's entity id.
    pub issuer: String,
    pub acs_url: String,
    pub relay_state: Option<String>,
    /// `post` or `redirect`.
    pub binding: String,
}

/// A SAML request reconstructed from its history.
#[derive(Debug, Clone)]
pub struct SamlRequest {
    pub id: String,
    pub issuer: String,
    pub acs_url: String,
    pub relay_state: Option<String>,
    pub binding: String,
    pub status: SamlRequestStatus,
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub version: i64,
}

impl SamlRequest {
    fn fold(id: &str, events: &[StoreEvent]) -> Option<Self> {
        let mut request: Option<SamlRequest> = None;
        for event in events {
            match &event.payload {
                EventPayload::SamlRequestAdded(added) => {
                    request = Some(SamlRequest {
                        id: id.to_owned(),
                        issuer: added.issuer.clone(),
                        acs_url: added.acs_url.clone(),
                        relay_state: added.relay_state.clone(),
                        binding: added.binding.clone(),
                        status: SamlRequestStatus::Added,
                        session_id: None,
                        user_id: None,
                        version: event.aggregate_version,
                    });
                }
                EventPayload::SamlRequestSessionLinked(linked) => {
                    if let Some(request) = request.as_mut() {
                        request.status = SamlRequestStatus::SessionLinked;
                        request.session_id = Some(linked.session_id.clone());
                        request.user_id = Some(linked.user_id.clone());
                        request.version = event.aggregate_version;
                    }
                }
                EventPayload::SamlRequestSucceeded(_) => {
                    if let Some(request) = request.as_mut() {
                        request.status = SamlRequestStatus::Succeeded;
                        request.version = event.aggregate_version;
                    }
                }
                EventPayload::SamlRequestFailed(_) => {
                    if let Some(request) = request.as_mut() {
                        request.status = SamlRequestStatus::Failed;
                        request.version = event.aggregate_version;
                    }
                }
                _ => {}
            }
        }
        request
    }
}

/// Result of a successful [`Commands::handle_saml_response`].
#[derive(Debug, Clone)]
pub struct SamlResponseIssued {
    pub saml_session_id: String,
    pub user_id: String,
    pub acs_url: String,
    pub relay_state: Option<String>,
    pub details: ObjectDetails,
}

impl Commands {
    pub async fn add_saml_request(
        &self,
        ctx: &CommandContext,
        input: SamlRequestInput,
    ) -> Result<(String, ObjectDetails)> {
        ctx.require_instance()?;
        require(&input.login_client, "login_client")?;
        require(&input.issuer, "issuer")?;
        require(&input.acs_url, "acs_url")?;
        if input.binding != "post" && input.binding != "redirect" {
            return Err(Error::validation("binding", "must be `post` or `redirect`"));
        }

        let request_id = self.next_id();
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    &request_id,
                    &ctx.resource_owner(),
                    EventPayload::SamlRequestAdded(SamlRequestAdded {
                        login_client: input.login_client,
                        issuer: input.issuer,
                        acs_url: input.acs_url,
                        relay_state: input.relay_state,
                        binding: input.binding,
                    }),
                )],
                0,
            )
            .await?;
        Ok((request_id, ObjectDetails::from_events(&events)))
    }

    /// Attaches an authenticated session to a pending request.
    pub async fn link_session_to_saml_request(
        &self,
        ctx: &CommandContext,
        request_id: &str,
        session_id: &str,
        user_id: &str,
    ) -> Result<ObjectDetails> {
        require(session_id, "session_id")?;
        require(user_id, "user_id")?;
        let request = self.load_saml_request(ctx, request_id).await?;
        if request.status != SamlRequestStatus::Added {
            return Err(Error::validation("request", "request is already linked or settled"));
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    request_id,
                    &ctx.resource_owner(),
                    EventPayload::SamlRequestSessionLinked(SamlRequestSessionLinked {
                        session_id: session_id.to_owned(),
                        user_id: user_id.to_owned(),
                        authenticated_at: Utc::now(),
                    }),
                )],
                request.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    /// Settles a linked request successfully and mints the SAML session
    /// the response asserts. The assertion serialization happens in the
    /// transport layer using the returned data.
    pub async fn handle_saml_response(
        &self,
        ctx: &CommandContext,
        request_id: &str,
    ) -> Result<SamlResponseIssued> {
        let request = self.load_saml_request(ctx, request_id).await?;
        if request.status != SamlRequestStatus::SessionLinked {
            return Err(Error::validation("request", "no session linked to this request"));
        }
        let (session_id, user_id) = match (&request.session_id, &request.user_id) {
            (Some(session_id), Some(user_id)) => (session_id.clone(), user_id.clone()),
            _ => return Err(Error::validation("request", "no session linked to this request")),
        };

        self.store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    request_id,
                    &ctx.resource_owner(),
                    EventPayload::SamlRequestSucceeded(SamlRequestSucceeded {}),
                )],
                request.version,
            )
            .await?;

        let saml_session_id = self.next_id();
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    &saml_session_id,
                    &ctx.resource_owner(),
                    EventPayload::SamlSessionAdded(SamlSessionAdded {
                        user_id: user_id.clone(),
                        session_id,
                        entity_id: request.issuer.clone(),
                        audience: vec![request.issuer.clone()],
                        expiration: Utc::now() + Duration::minutes(SAML_SESSION_LIFETIME_MINUTES),
                    }),
                )],
                0,
            )
            .await?;

        Ok(SamlResponseIssued {
            saml_session_id,
            user_id,
            acs_url: request.acs_url,
            relay_state: request.relay_state,
            details: ObjectDetails::from_events(&events),
        })
    }

    pub async fn fail_saml_request(
        &self,
        ctx: &CommandContext,
        request_id: &str,
        reason: &str,
    ) -> Result<ObjectDetails> {
        let request = self.load_saml_request(ctx, request_id).await?;
        if matches!(
            request.status,
            SamlRequestStatus::Succeeded | SamlRequestStatus::Failed
        ) {
            return Err(Error::validation("request", "request is already settled"));
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    request_id,
                    &ctx.resource_owner(),
                    EventPayload::SamlRequestFailed(SamlRequestFailed {
                        reason: reason.to_owned(),
                    }),
                )],
                request.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    /// Terminates a SAML session. Only the session's own user (or a
    /// system caller) may terminate it.
    pub async fn terminate_saml_session(
        &self,
        ctx: &CommandContext,
        saml_session_id: &str,
    ) -> Result<ObjectDetails> {
        let history = self
            .require_history(ctx, AggregateKind::SamlSession, saml_session_id)
            .await?;

        let mut owner: Option<String> = None;
        let mut terminated = false;
        for event in &history.events {
            match &event.payload {
                EventPayload::SamlSessionAdded(added) => owner = Some(added.user_id.clone()),
                EventPayload::SamlSessionTerminated(_) => terminated = true,
                _ => {}
            }
        }
        if terminated {
            return Err(Error::NotFound(format!("saml session {saml_session_id}")));
        }
        if let (Some(owner), Some(caller)) = (&owner, &ctx.user_id) {
            if owner != caller {
                return Err(Error::PermissionDenied("SAML-perm01".to_owned()));
            }
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    saml_session_id,
                    &ctx.resource_owner(),
                    EventPayload::SamlSessionTerminated(SamlSessionTerminated {}),
                )],
                history.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    async fn load_saml_request(&self, ctx: &CommandContext, request_id: &str) -> Result<SamlRequest> {
        let history = self
            .require_history(ctx, AggregateKind::SamlRequest, request_id)
            .await?;
        SamlRequest::fold(request_id, &history.events)
            .ok_or_else(|| Error::NotFound(format!("saml request {request_id}")))
    }
}

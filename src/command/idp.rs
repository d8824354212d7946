//! External identity provider intents: the core's side of OAuth/OIDC
//! logins. Wire-format exchanges happen in the transport layer; the
//! callbacks here receive the already-parsed provider identity.

use serde_json::Value;

use crate::command::{random_secret, require, CommandContext, Commands, ObjectDetails};
use crate::error::{Error, Result};
use crate::event::{
    EventPayload, IdpIntentFailed, IdpIntentStarted, IdpIntentSucceeded, StoreEvent,
};
use crate::store::EventFilter;
use crate::types::AggregateKind;

/// Progress of one intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdpIntentStatus {
    Started,
    Succeeded,
    Failed,
}

/// An intent reconstructed from its history.
#[derive(Debug, Clone)]
pub struct IdpIntent {
    pub id: String,
    pub idp_id: String,
    pub success_url: String,
    pub failure_url: String,
    pub state: String,
    pub status: IdpIntentStatus,
    pub idp_user_id: Option<String>,
    pub idp_username: Option<String>,
    pub user_id: Option<String>,
    pub version: i64,
}

impl IdpIntent {
    fn fold(id: &str, events: &[StoreEvent]) -> Option<Self> {
        let mut intent: Option<IdpIntent> = None;
        for event in events {
            match &event.payload {
                EventPayload::IdpIntentStarted(started) => {
                    intent = Some(IdpIntent {
                        id: id.to_owned(),
                        idp_id: started.idp_id.clone(),
                        success_url: started.success_url.clone(),
                        failure_url: started.failure_url.clone(),
                        state: started.state.clone(),
                        status: IdpIntentStatus::Started,
                        idp_user_id: None,
                        idp_username: None,
                        user_id: None,
                        version: event.aggregate_version,
                    });
                }
                EventPayload::IdpIntentSucceeded(succeeded) => {
                    if let Some(intent) = intent.as_mut() {
                        intent.status = IdpIntentStatus::Succeeded;
                        intent.idp_user_id = Some(succeeded.idp_user_id.clone());
                        intent.idp_username = Some(succeeded.idp_username.clone());
                        intent.user_id = succeeded.user_id.clone();
                        intent.version = event.aggregate_version;
                    }
                }
                EventPayload::IdpIntentFailed(_) => {
                    if let Some(intent) = intent.as_mut() {
                        intent.status = IdpIntentStatus::Failed;
                        intent.version = event.aggregate_version;
                    }
                }
                _ => {}
            }
        }
        intent
    }
}

/// The provider identity carried back by an OAuth or OIDC callback,
/// already parsed by the transport layer.
#[derive(Debug, Clone, Default)]
pub struct IdpCallback {
    /// The `state` round-tripped through the provider.
    pub state: String,
    pub idp_user_id: String,
    pub idp_username: String,
    /// Local user the identity maps to, when known.
    pub user_id: Option<String>,
    /// Canonical parsed claims/userinfo.
    pub raw_information: Value,
}

impl Commands {
    /// Starts a login against an external provider, returning the
    /// intent id and the `state` to round-trip.
    pub async fn start_idp_intent(
        &self,
        ctx: &CommandContext,
        idp_id: &str,
        success_url: &str,
        failure_url: &str,
    ) -> Result<(IdpIntent, ObjectDetails)> {
        ctx.require_instance()?;
        require(idp_id, "idp_id")?;
        require(success_url, "success_url")?;
        require(failure_url, "failure_url")?;

        let intent_id = self.next_id();
        let state = random_secret(16);
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    &intent_id,
                    &ctx.resource_owner(),
                    EventPayload::IdpIntentStarted(IdpIntentStarted {
                        idp_id: idp_id.to_owned(),
                        success_url: success_url.to_owned(),
                        failure_url: failure_url.to_owned(),
                        state: state.clone(),
                    }),
                )],
                0,
            )
            .await?;

        let intent = IdpIntent {
            id: intent_id,
            idp_id: idp_id.to_owned(),
            success_url: success_url.to_owned(),
            failure_url: failure_url.to_owned(),
            state,
            status: IdpIntentStatus::Started,
            idp_user_id: None,
            idp_username: None,
            user_id: None,
            version: 1,
        };
        Ok((intent, ObjectDetails::from_events(&events)))
    }

    /// Finds the intent a provider callback belongs to by its `state`.
    pub async fn idp_intent_by_state(
        &self,
        ctx: &CommandContext,
        state: &str,
    ) -> Result<Option<IdpIntent>> {
        let filter = EventFilter::new()
            .instance(ctx.instance_id.clone())
            .aggregate_type(AggregateKind::IdpIntent)
            .event_type("idp_intent.started");

        for event in self.store().events(&filter).await? {
            if let EventPayload::IdpIntentStarted(started) = &event.payload {
                if started.state == state {
                    let history = self
                        .require_history(ctx, AggregateKind::IdpIntent, &event.aggregate_id)
                        .await?;
                    return Ok(IdpIntent::fold(&event.aggregate_id, &history.events));
                }
            }
        }
        Ok(None)
    }

    /// Completes an intent from an OAuth (authorization-code) callback.
    pub async fn handle_oauth_callback(
        &self,
        ctx: &CommandContext,
        intent_id: &str,
        callback: IdpCallback,
    ) -> Result<ObjectDetails> {
        self.complete_idp_intent(ctx, intent_id, callback).await
    }

    /// Completes an intent from an OIDC callback (id-token claims
    /// parsed upstream).
    pub async fn handle_oidc_callback(
        &self,
        ctx: &CommandContext,
        intent_id: &str,
        callback: IdpCallback,
    ) -> Result<ObjectDetails> {
        self.complete_idp_intent(ctx, intent_id, callback).await
    }

    /// Marks an intent failed, recording the reason.
    pub async fn fail_idp_intent(
        &self,
        ctx: &CommandContext,
        intent_id: &str,
        reason: &str,
    ) -> Result<ObjectDetails> {
        let intent = self.load_idp_intent(ctx, intent_id).await?;
        if intent.status != IdpIntentStatus::Started {
            return Err(Error::validation("intent", "intent is already settled"));
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    intent_id,
                    &ctx.resource_owner(),
                    EventPayload::IdpIntentFailed(IdpIntentFailed {
                        reason: reason.to_owned(),
                    }),
                )],
                intent.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    async fn complete_idp_intent(
        &self,
        ctx: &CommandContext,
        intent_id: &str,
        callback: IdpCallback,
    ) -> Result<ObjectDetails> {
        require(&callback.idp_user_id, "idp_user_id")?;
        let intent = self.load_idp_intent(ctx, intent_id).await?;
        if intent.status != IdpIntentStatus::Started {
            return Err(Error::validation("intent", "intent is already settled"));
        }
        if intent.state != callback.state {
            return Err(Error::PermissionDenied("IDP-state01".to_owned()));
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    intent_id,
                    &ctx.resource_owner(),
                    EventPayload::IdpIntentSucceeded(IdpIntentSucceeded {
                        idp_user_id: callback.idp_user_id,
                        idp_username: callback.idp_username,
                        user_id: callback.user_id,
                        raw_information: callback.raw_information,
                    }),
                )],
                intent.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    async fn load_idp_intent(&self, ctx: &CommandContext, intent_id: &str) -> Result<IdpIntent> {
        let history = self
            .require_history(ctx, AggregateKind::IdpIntent, intent_id)
            .await?;
        IdpIntent::fold(intent_id, &history.events)
            .ok_or_else(|| Error::NotFound(format!("idp intent {intent_id}")))
    }
}

//! Application commands: OIDC, API and SAML variants on the
//! application aggregate.

use crate::command::{digest, random_secret, require, CommandContext, Commands, ObjectDetails};
use crate::error::{Error, Result};
use crate::event::{
    ApiConfigChanged, ApplicationAdded, ApplicationChanged, ApplicationDeactivated,
    ApplicationReactivated, ApplicationRemoved, ApplicationSecretChanged, EventPayload,
    OidcConfigChanged, SamlConfigChanged, StoreEvent,
};
use crate::types::{AggregateKind, AppKind, ObjectState};

/// OIDC client settings accepted at creation and update.
#[derive(Debug, Clone, Default)]
pub struct OidcAppConfig {
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub response_types: Vec<String>,
    pub grant_types: Vec<String>,
    pub app_type: Option<String>,
    pub auth_method: Option<String>,
    pub dev_mode: bool,
}

/// Result of creating a client-secret-bearing app. The clear secret is
/// handed out exactly once.
#[derive(Debug, Clone)]
pub struct AppCreated {
    pub app_id: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub details: ObjectDetails,
}

/// Current application state folded from its event history.
#[derive(Debug, Clone)]
pub(crate) struct AppWriteModel {
    pub version: i64,
    pub state: ObjectState,
    pub kind: AppKind,
}

impl AppWriteModel {
    pub(crate) fn fold(events: &[StoreEvent]) -> Self {
        let mut model = Self {
            version: 0,
            state: ObjectState::Active,
            kind: AppKind::Oidc,
        };
        for event in events {
            model.version = event.aggregate_version;
            match &event.payload {
                EventPayload::ApplicationAdded(added) => model.kind = added.kind,
                EventPayload::ApplicationDeactivated(_) => model.state = ObjectState::Inactive,
                EventPayload::ApplicationReactivated(_) => model.state = ObjectState::Active,
                EventPayload::ApplicationRemoved(_) => model.state = ObjectState::Removed,
                _ => {}
            }
        }
        model
    }
}

impl Commands {
    async fn load_app(&self, ctx: &CommandContext, app_id: &str) -> Result<AppWriteModel> {
        let history = self
            .require_history(ctx, AggregateKind::Application, app_id)
            .await?;
        let model = AppWriteModel::fold(&history.events);
        if model.state == ObjectState::Removed {
            return Err(Error::NotFound(format!("application {app_id}")));
        }
        Ok(model)
    }

    async fn require_project(&self, ctx: &CommandContext, project_id: &str) -> Result<()> {
        let history = self
            .require_history(ctx, AggregateKind::Project, project_id)
            .await?;
        let model = super::project::ProjectWriteModel::fold(&history.events);
        if model.state == ObjectState::Removed {
            return Err(Error::NotFound(format!("project {project_id}")));
        }
        Ok(())
    }

    /// Creates an OIDC app: `application.added` plus the initial
    /// `application.oidc.config.changed` in one atomic batch.
    pub async fn add_oidc_app(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        name: &str,
        config: OidcAppConfig,
    ) -> Result<AppCreated> {
        require(name, "name")?;
        if config.redirect_uris.is_empty() {
            return Err(Error::validation("redirect_uris", "at least one redirect URI is required"));
        }
        self.require_project(ctx, project_id).await?;

        let app_id = self.next_id();
        let client_id = format!("{app_id}@{project_id}");
        let client_secret = random_secret(32);

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![
                    self.command(
                        ctx,
                        &app_id,
                        &ctx.resource_owner(),
                        EventPayload::ApplicationAdded(ApplicationAdded {
                            project_id: project_id.to_owned(),
                            name: name.to_owned(),
                            kind: AppKind::Oidc,
                        }),
                    ),
                    self.command(
                        ctx,
                        &app_id,
                        &ctx.resource_owner(),
                        EventPayload::OidcConfigChanged(OidcConfigChanged {
                            redirect_uris: config.redirect_uris,
                            post_logout_redirect_uris: config.post_logout_redirect_uris,
                            response_types: config.response_types,
                            grant_types: config.grant_types,
                            app_type: config.app_type,
                            auth_method: config.auth_method,
                            dev_mode: config.dev_mode,
                            client_id: Some(client_id.clone()),
                            client_secret_digest: Some(digest(&client_secret)),
                        }),
                    ),
                ],
                0,
            )
            .await?;

        Ok(AppCreated {
            app_id,
            client_id,
            client_secret: Some(client_secret),
            details: ObjectDetails::from_events(&events),
        })
    }

    /// Creates an API app (client-credentials style).
    pub async fn add_api_app(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        name: &str,
        auth_method: Option<String>,
    ) -> Result<AppCreated> {
        require(name, "name")?;
        self.require_project(ctx, project_id).await?;

        let app_id = self.next_id();
        let client_id = format!("{app_id}@{project_id}");
        let client_secret = random_secret(32);

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![
                    self.command(
                        ctx,
                        &app_id,
                        &ctx.resource_owner(),
                        EventPayload::ApplicationAdded(ApplicationAdded {
                            project_id: project_id.to_owned(),
                            name: name.to_owned(),
                            kind: AppKind::Api,
                        }),
                    ),
                    self.command(
                        ctx,
                        &app_id,
                        &ctx.resource_owner(),
                        EventPayload::ApiConfigChanged(ApiConfigChanged {
                            auth_method,
                            client_id: Some(client_id.clone()),
                            client_secret_digest: Some(digest(&client_secret)),
                        }),
                    ),
                ],
                0,
            )
            .await?;

        Ok(AppCreated {
            app_id,
            client_id,
            client_secret: Some(client_secret),
            details: ObjectDetails::from_events(&events),
        })
    }

    /// Creates a SAML service-provider app from its canonical parsed
    /// metadata (entity id + ACS endpoint); XML handling stays outside
    /// the core.
    pub async fn add_saml_app(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        name: &str,
        entity_id: &str,
        acs_url: &str,
        certificate: Option<String>,
    ) -> Result<AppCreated> {
        require(name, "name")?;
        require(entity_id, "entity_id")?;
        require(acs_url, "acs_url")?;
        self.require_project(ctx, project_id).await?;

        let app_id = self.next_id();
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![
                    self.command(
                        ctx,
                        &app_id,
                        &ctx.resource_owner(),
                        EventPayload::ApplicationAdded(ApplicationAdded {
                            project_id: project_id.to_owned(),
                            name: name.to_owned(),
                            kind: AppKind::Saml,
                        }),
                    ),
                    self.command(
                        ctx,
                        &app_id,
                        &ctx.resource_owner(),
                        EventPayload::SamlConfigChanged(SamlConfigChanged {
                            entity_id: entity_id.to_owned(),
                            acs_url: acs_url.to_owned(),
                            certificate,
                        }),
                    ),
                ],
                0,
            )
            .await?;

        Ok(AppCreated {
            app_id,
            client_id: entity_id.to_owned(),
            client_secret: None,
            details: ObjectDetails::from_events(&events),
        })
    }

    pub async fn update_application(
        &self,
        ctx: &CommandContext,
        app_id: &str,
        name: &str,
    ) -> Result<ObjectDetails> {
        require(name, "name")?;
        let model = self.load_app(ctx, app_id).await?;
        self.app_transition(
            ctx,
            app_id,
            model.version,
            EventPayload::ApplicationChanged(ApplicationChanged {
                name: name.to_owned(),
            }),
        )
        .await
    }

    pub async fn update_oidc_app_config(
        &self,
        ctx: &CommandContext,
        app_id: &str,
        config: OidcAppConfig,
    ) -> Result<ObjectDetails> {
        let model = self.load_app(ctx, app_id).await?;
        if model.kind != AppKind::Oidc {
            return Err(Error::validation("app", "not an OIDC application"));
        }

        self.app_transition(
            ctx,
            app_id,
            model.version,
            EventPayload::OidcConfigChanged(OidcConfigChanged {
                redirect_uris: config.redirect_uris,
                post_logout_redirect_uris: config.post_logout_redirect_uris,
                response_types: config.response_types,
                grant_types: config.grant_types,
                app_type: config.app_type,
                auth_method: config.auth_method,
                dev_mode: config.dev_mode,
                client_id: None,
                client_secret_digest: None,
            }),
        )
        .await
    }

    pub async fn update_api_app_config(
        &self,
        ctx: &CommandContext,
        app_id: &str,
        auth_method: Option<String>,
    ) -> Result<ObjectDetails> {
        let model = self.load_app(ctx, app_id).await?;
        if model.kind != AppKind::Api {
            return Err(Error::validation("app", "not an API application"));
        }

        self.app_transition(
            ctx,
            app_id,
            model.version,
            EventPayload::ApiConfigChanged(ApiConfigChanged {
                auth_method,
                client_id: None,
                client_secret_digest: None,
            }),
        )
        .await
    }

    pub async fn deactivate_application(
        &self,
        ctx: &CommandContext,
        app_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_app(ctx, app_id).await?;
        if model.state != ObjectState::Active {
            return Err(Error::validation("state", "only active applications can be deactivated"));
        }
        self.app_transition(
            ctx,
            app_id,
            model.version,
            EventPayload::ApplicationDeactivated(ApplicationDeactivated {}),
        )
        .await
    }

    pub async fn reactivate_application(
        &self,
        ctx: &CommandContext,
        app_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_app(ctx, app_id).await?;
        if model.state != ObjectState::Inactive {
            return Err(Error::validation("state", "only inactive applications can be reactivated"));
        }
        self.app_transition(
            ctx,
            app_id,
            model.version,
            EventPayload::ApplicationReactivated(ApplicationReactivated {}),
        )
        .await
    }

    pub async fn remove_application(
        &self,
        ctx: &CommandContext,
        app_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_app(ctx, app_id).await?;
        self.app_transition(
            ctx,
            app_id,
            model.version,
            EventPayload::ApplicationRemoved(ApplicationRemoved {}),
        )
        .await
    }

    /// Rotates the client secret, returning the new clear secret once.
    pub async fn regenerate_app_client_secret(
        &self,
        ctx: &CommandContext,
        app_id: &str,
    ) -> Result<(String, ObjectDetails)> {
        let model = self.load_app(ctx, app_id).await?;
        if model.kind == AppKind::Saml {
            return Err(Error::validation("app", "SAML applications have no client secret"));
        }

        let client_secret = random_secret(32);
        let details = self
            .app_transition(
                ctx,
                app_id,
                model.version,
                EventPayload::ApplicationSecretChanged(ApplicationSecretChanged {
                    client_secret_digest: digest(&client_secret),
                }),
            )
            .await?;
        Ok((client_secret, details))
    }

    async fn app_transition(
        &self,
        ctx: &CommandContext,
        app_id: &str,
        version: i64,
        payload: EventPayload,
    ) -> Result<ObjectDetails> {
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(ctx, app_id, &ctx.resource_owner(), payload)],
                version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }
}

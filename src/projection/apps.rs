//! Application read model: `projections.apps` with the variant-specific
//! OIDC/API/SAML configuration flattened into nullable columns.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::config::ProjectionConfig;
use crate::error::Result;
use crate::event::{EventPayload, StoreEvent};
use crate::projection::Projection;
use crate::types::ObjectState;

pub const NAME: &str = "apps";

const CREATE_APPS: &str = "
    CREATE TABLE IF NOT EXISTS projections.apps
    (
      instance_id TEXT NOT NULL,
      id TEXT NOT NULL,
      project_id TEXT NOT NULL,
      resource_owner TEXT NOT NULL,
      name TEXT NOT NULL,
      state TEXT NOT NULL DEFAULT 'active',
      kind TEXT NOT NULL,
      client_id TEXT,
      client_secret_digest TEXT,
      redirect_uris TEXT[] NOT NULL DEFAULT '{}',
      post_logout_redirect_uris TEXT[] NOT NULL DEFAULT '{}',
      response_types TEXT[] NOT NULL DEFAULT '{}',
      grant_types TEXT[] NOT NULL DEFAULT '{}',
      app_type TEXT,
      auth_method TEXT,
      dev_mode BOOLEAN NOT NULL DEFAULT FALSE,
      entity_id TEXT,
      acs_url TEXT,
      certificate TEXT,
      sequence BIGINT NOT NULL DEFAULT 0,
      created_at TIMESTAMPTZ NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL,
      CONSTRAINT apps_pkey PRIMARY KEY (instance_id, id)
    )";

const CREATE_APPS_PROJECT_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS apps_project ON projections.apps (instance_id, project_id)";

const CREATE_APPS_CLIENT_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS apps_client_id ON projections.apps (instance_id, client_id)";

pub fn config() -> ProjectionConfig {
    ProjectionConfig::builder()
        .name(NAME)
        .tables(vec!["projections.apps".to_owned()])
        .aggregate_types(vec!["application".to_owned()])
        .build()
}

/// Reducer for the application aggregate.
#[derive(Debug, Default, Clone)]
pub struct AppProjection;

impl AppProjection {
    async fn set_state(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoreEvent,
        state: ObjectState,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE projections.apps
             SET state = $4, sequence = $3, updated_at = $5
             WHERE instance_id = $1 AND id = $2 AND sequence < $3",
        )
        .bind(&event.instance_id)
        .bind(&event.aggregate_id)
        .bind(event.aggregate_version)
        .bind(state.as_str())
        .bind(event.creation_date)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Projection for AppProjection {
    async fn init(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(crate::sql::statements::CREATE_PROJECTIONS_SCHEMA)
            .execute(pool)
            .await?;
        sqlx::query(CREATE_APPS).execute(pool).await?;
        sqlx::query(CREATE_APPS_PROJECT_INDEX).execute(pool).await?;
        sqlx::query(CREATE_APPS_CLIENT_INDEX).execute(pool).await?;
        Ok(())
    }

    async fn reduce(&self, event: &StoreEvent, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        match &event.payload {
            EventPayload::ApplicationAdded(added) => {
                sqlx::query(
                    "INSERT INTO projections.apps
                     (instance_id, id, project_id, resource_owner, name, state, kind, sequence, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
                     ON CONFLICT (instance_id, id) DO NOTHING",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&added.project_id)
                .bind(&event.resource_owner)
                .bind(&added.name)
                .bind(ObjectState::Active.as_str())
                .bind(added.kind.as_str())
                .bind(event.aggregate_version)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::ApplicationChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.apps
                     SET name = $4, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&changed.name)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::OidcConfigChanged(config) => {
                sqlx::query(
                    "UPDATE projections.apps
                     SET redirect_uris = $4,
                         post_logout_redirect_uris = $5,
                         response_types = $6,
                         grant_types = $7,
                         app_type = COALESCE($8, app_type),
                         auth_method = COALESCE($9, auth_method),
                         dev_mode = $10,
                         client_id = COALESCE($11, client_id),
                         client_secret_digest = COALESCE($12, client_secret_digest),
                         sequence = $3, updated_at = $13
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&config.redirect_uris)
                .bind(&config.post_logout_redirect_uris)
                .bind(&config.response_types)
                .bind(&config.grant_types)
                .bind(&config.app_type)
                .bind(&config.auth_method)
                .bind(config.dev_mode)
                .bind(&config.client_id)
                .bind(&config.client_secret_digest)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::ApiConfigChanged(config) => {
                sqlx::query(
                    "UPDATE projections.apps
                     SET auth_method = COALESCE($4, auth_method),
                         client_id = COALESCE($5, client_id),
                         client_secret_digest = COALESCE($6, client_secret_digest),
                         sequence = $3, updated_at = $7
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&config.auth_method)
                .bind(&config.client_id)
                .bind(&config.client_secret_digest)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::SamlConfigChanged(config) => {
                sqlx::query(
                    "UPDATE projections.apps
                     SET entity_id = $4, acs_url = $5, certificate = COALESCE($6, certificate),
                         sequence = $3, updated_at = $7
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&config.entity_id)
                .bind(&config.acs_url)
                .bind(&config.certificate)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::ApplicationSecretChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.apps
                     SET client_secret_digest = $4, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&changed.client_secret_digest)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::ApplicationDeactivated(_) => {
                self.set_state(tx, event, ObjectState::Inactive).await?;
            }
            EventPayload::ApplicationReactivated(_) => {
                self.set_state(tx, event, ObjectState::Active).await?;
            }
            EventPayload::ApplicationRemoved(_) => {
                self.set_state(tx, event, ObjectState::Removed).await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn reset(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query("TRUNCATE projections.apps").execute(&mut **tx).await?;
        Ok(())
    }
}

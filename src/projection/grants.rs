//! User-grant read model: `projections.user_grants`.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::config::ProjectionConfig;
use crate::error::Result;
use crate::event::{EventPayload, StoreEvent};
use crate::projection::Projection;
use crate::types::ObjectState;

pub const NAME: &str = "user_grants";

const CREATE_USER_GRANTS: &str = "
    CREATE TABLE IF NOT EXISTS projections.user_grants
    (
      instance_id TEXT NOT NULL,
      id TEXT NOT NULL,
      user_id TEXT NOT NULL,
      project_id TEXT NOT NULL,
      project_grant_id TEXT,
      roles TEXT[] NOT NULL DEFAULT '{}',
      state TEXT NOT NULL DEFAULT 'active',
      resource_owner TEXT NOT NULL,
      sequence BIGINT NOT NULL DEFAULT 0,
      created_at TIMESTAMPTZ NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL,
      CONSTRAINT user_grants_pkey PRIMARY KEY (instance_id, id)
    )";

const CREATE_USER_GRANTS_USER_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS user_grants_user ON projections.user_grants (instance_id, user_id)";

pub fn config() -> ProjectionConfig {
    ProjectionConfig::builder()
        .name(NAME)
        .tables(vec!["projections.user_grants".to_owned()])
        .aggregate_types(vec!["user_grant".to_owned()])
        .build()
}

/// Reducer for the user-grant aggregate.
#[derive(Debug, Default, Clone)]
pub struct UserGrantProjection;

#[async_trait]
impl Projection for UserGrantProjection {
    async fn init(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(crate::sql::statements::CREATE_PROJECTIONS_SCHEMA)
            .execute(pool)
            .await?;
        sqlx::query(CREATE_USER_GRANTS).execute(pool).await?;
        sqlx::query(CREATE_USER_GRANTS_USER_INDEX).execute(pool).await?;
        Ok(())
    }

    async fn reduce(&self, event: &StoreEvent, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        match &event.payload {
            EventPayload::UserGrantAdded(added) => {
                sqlx::query(
                    "INSERT INTO projections.user_grants
                     (instance_id, id, user_id, project_id, project_grant_id, roles, state,
                      resource_owner, sequence, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
                     ON CONFLICT (instance_id, id) DO NOTHING",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&added.user_id)
                .bind(&added.project_id)
                .bind(&added.project_grant_id)
                .bind(&added.roles)
                .bind(ObjectState::Active.as_str())
                .bind(&event.resource_owner)
                .bind(event.aggregate_version)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::UserGrantChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.user_grants
                     SET roles = $4, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&changed.roles)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::UserGrantRemoved(_) => {
                sqlx::query(
                    "UPDATE projections.user_grants
                     SET state = $4, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(ObjectState::Removed.as_str())
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn reset(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query("TRUNCATE projections.user_grants").execute(&mut **tx).await?;
        Ok(())
    }
}

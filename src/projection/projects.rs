//! Project read model: `projections.projects`,
//! `projections.project_roles` and `projections.project_grants`.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::config::ProjectionConfig;
use crate::error::Result;
use crate::event::{EventPayload, StoreEvent};
use crate::projection::Projection;
use crate::types::ObjectState;

pub const NAME: &str = "projects";

const CREATE_PROJECTS: &str = "
    CREATE TABLE IF NOT EXISTS projections.projects
    (
      instance_id TEXT NOT NULL,
      id TEXT NOT NULL,
      resource_owner TEXT NOT NULL,
      name TEXT NOT NULL,
      state TEXT NOT NULL DEFAULT 'active',
      project_role_assertion BOOLEAN NOT NULL DEFAULT FALSE,
      project_role_check BOOLEAN NOT NULL DEFAULT FALSE,
      private_labeling TEXT,
      sequence BIGINT NOT NULL DEFAULT 0,
      created_at TIMESTAMPTZ NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL,
      CONSTRAINT projects_pkey PRIMARY KEY (instance_id, id)
    )";

const CREATE_PROJECT_ROLES: &str = "
    CREATE TABLE IF NOT EXISTS projections.project_roles
    (
      instance_id TEXT NOT NULL,
      project_id TEXT NOT NULL,
      role_key TEXT NOT NULL,
      display_name TEXT NOT NULL,
      role_group TEXT,
      created_at TIMESTAMPTZ NOT NULL,
      CONSTRAINT project_roles_pkey PRIMARY KEY (instance_id, project_id, role_key)
    )";

const CREATE_PROJECT_GRANTS: &str = "
    CREATE TABLE IF NOT EXISTS projections.project_grants
    (
      instance_id TEXT NOT NULL,
      grant_id TEXT NOT NULL,
      project_id TEXT NOT NULL,
      granted_org_id TEXT NOT NULL,
      granted_roles TEXT[] NOT NULL DEFAULT '{}',
      state TEXT NOT NULL DEFAULT 'active',
      resource_owner TEXT NOT NULL,
      sequence BIGINT NOT NULL DEFAULT 0,
      created_at TIMESTAMPTZ NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL,
      CONSTRAINT project_grants_pkey PRIMARY KEY (instance_id, grant_id)
    )";

const CREATE_PROJECT_GRANTS_ORG_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS project_grants_granted_org
    ON projections.project_grants (instance_id, granted_org_id)";

pub fn config() -> ProjectionConfig {
    ProjectionConfig::builder()
        .name(NAME)
        .tables(vec![
            "projections.projects".to_owned(),
            "projections.project_roles".to_owned(),
            "projections.project_grants".to_owned(),
        ])
        .aggregate_types(vec!["project".to_owned()])
        .build()
}

/// Reducer for the project aggregate (member events are owned by the
/// member projection).
#[derive(Debug, Default, Clone)]
pub struct ProjectProjection;

impl ProjectProjection {
    async fn set_state(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoreEvent,
        state: ObjectState,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE projections.projects
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
impl Projection for ProjectProjection {
    async fn init(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(crate::sql::statements::CREATE_PROJECTIONS_SCHEMA)
            .execute(pool)
            .await?;
        sqlx::query(CREATE_PROJECTS).execute(pool).await?;
        sqlx::query(CREATE_PROJECT_ROLES).execute(pool).await?;
        sqlx::query(CREATE_PROJECT_GRANTS).execute(pool).await?;
        sqlx::query(CREATE_PROJECT_GRANTS_ORG_INDEX).execute(pool).await?;
        Ok(())
    }

    async fn reduce(&self, event: &StoreEvent, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        match &event.payload {
            EventPayload::ProjectAdded(added) => {
                sqlx::query(
                    "INSERT INTO projections.projects
                     (instance_id, id, resource_owner, name, state, project_role_assertion,
                      project_role_check, private_labeling, sequence, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10)
                     ON CONFLICT (instance_id, id) DO NOTHING",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&event.resource_owner)
                .bind(&added.name)
                .bind(ObjectState::Active.as_str())
                .bind(added.project_role_assertion)
                .bind(added.project_role_check)
                .bind(&added.private_labeling)
                .bind(event.aggregate_version)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::ProjectChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.projects
                     SET name = COALESCE($4, name),
                         project_role_assertion = COALESCE($5, project_role_assertion),
                         project_role_check = COALESCE($6, project_role_check),
                         private_labeling = COALESCE($7, private_labeling),
                         sequence = $3, updated_at = $8
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&changed.name)
                .bind(changed.project_role_assertion)
                .bind(changed.project_role_check)
                .bind(&changed.private_labeling)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::ProjectDeactivated(_) => {
                self.set_state(tx, event, ObjectState::Inactive).await?;
            }
            EventPayload::ProjectReactivated(_) => {
                self.set_state(tx, event, ObjectState::Active).await?;
            }
            EventPayload::ProjectRemoved(_) => {
                self.set_state(tx, event, ObjectState::Removed).await?;
            }
            EventPayload::ProjectRoleAdded(added) => {
                sqlx::query(
                    "INSERT INTO projections.project_roles
                     (instance_id, project_id, role_key, display_name, role_group, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (instance_id, project_id, role_key) DO NOTHING",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&added.role_key)
                .bind(&added.display_name)
                .bind(&added.group)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::ProjectRoleRemoved(removed) => {
                sqlx::query(
                    "DELETE FROM projections.project_roles
                     WHERE instance_id = $1 AND project_id = $2 AND role_key = $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&removed.role_key)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::ProjectGrantAdded(added) => {
                sqlx::query(
                    "INSERT INTO projections.project_grants
                     (instance_id, grant_id, project_id, granted_org_id, granted_roles, state,
                      resource_owner, sequence, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $9)
                     ON CONFLICT (instance_id, grant_id) DO NOTHING",
                )
                .bind(&event.instance_id)
                .bind(&added.grant_id)
                .bind(&event.aggregate_id)
                .bind(&added.granted_org_id)
                .bind(&added.role_keys)
                .bind(ObjectState::Active.as_str())
                .bind(&event.resource_owner)
                .bind(event.aggregate_version)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::ProjectGrantChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.project_grants
                     SET granted_roles = $4, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND grant_id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&changed.grant_id)
                .bind(event.aggregate_version)
                .bind(&changed.role_keys)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::ProjectGrantRemoved(removed) => {
                sqlx::query(
                    "UPDATE projections.project_grants
                     SET state = $4, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND grant_id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&removed.grant_id)
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
        sqlx::query("TRUNCATE projections.projects").execute(&mut **tx).await?;
        sqlx::query("TRUNCATE projections.project_roles").execute(&mut **tx).await?;
        sqlx::query("TRUNCATE projections.project_grants").execute(&mut **tx).await?;
        Ok(())
    }
}

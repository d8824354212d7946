//! Member read model: `projections.members`, one table for all four
//! membership scopes, discriminated by `member_type`.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::config::ProjectionConfig;
use crate::error::Result;
use crate::event::{EventPayload, MemberAdded, MemberChanged, MemberRemoved, StoreEvent};
use crate::projection::Projection;
use crate::types::MemberKind;

pub const NAME: &str = "members";

const CREATE_MEMBERS: &str = "
    CREATE TABLE IF NOT EXISTS projections.members
    (
      instance_id TEXT NOT NULL,
      member_type TEXT NOT NULL,
      scope_id TEXT NOT NULL,
      user_id TEXT NOT NULL,
      roles TEXT[] NOT NULL DEFAULT '{}',
      resource_owner TEXT NOT NULL,
      created_at TIMESTAMPTZ NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL,
      CONSTRAINT members_pkey PRIMARY KEY (instance_id, member_type, scope_id, user_id)
    )";

const CREATE_MEMBERS_USER_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS members_user ON projections.members (instance_id, user_id)";

pub fn config() -> ProjectionConfig {
    ProjectionConfig::builder()
        .name(NAME)
        .tables(vec!["projections.members".to_owned()])
        .aggregate_types(vec![
            "instance".to_owned(),
            "org".to_owned(),
            "project".to_owned(),
        ])
        .event_types(vec![
            "instance.member.added".to_owned(),
            "instance.member.changed".to_owned(),
            "instance.member.removed".to_owned(),
            "org.member.added".to_owned(),
            "org.member.changed".to_owned(),
            "org.member.removed".to_owned(),
            "project.member.added".to_owned(),
            "project.member.changed".to_owned(),
            "project.member.removed".to_owned(),
            "project.grant.member.added".to_owned(),
            "project.grant.member.changed".to_owned(),
            "project.grant.member.removed".to_owned(),
        ])
        .build()
}

/// Reducer for membership events across all aggregates.
#[derive(Debug, Default, Clone)]
pub struct MemberProjection;

impl MemberProjection {
    async fn upsert(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoreEvent,
        kind: MemberKind,
        scope_id: &str,
        user_id: &str,
        roles: &[String],
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO projections.members
             (instance_id, member_type, scope_id, user_id, roles, resource_owner, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
             ON CONFLICT (instance_id, member_type, scope_id, user_id)
             DO UPDATE SET roles = $5, updated_at = $7",
        )
        .bind(&event.instance_id)
        .bind(kind.as_str())
        .bind(scope_id)
        .bind(user_id)
        .bind(roles)
        .bind(&event.resource_owner)
        .bind(event.creation_date)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn remove(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoreEvent,
        kind: MemberKind,
        scope_id: &str,
        user_id: &str,
    ) -> Result<()> {
        sqlx::query(
            "DELETE FROM projections.members
             WHERE instance_id = $1 AND member_type = $2 AND scope_id = $3 AND user_id = $4",
        )
        .bind(&event.instance_id)
        .bind(kind.as_str())
        .bind(scope_id)
        .bind(user_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Projection for MemberProjection {
    async fn init(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(crate::sql::statements::CREATE_PROJECTIONS_SCHEMA)
            .execute(pool)
            .await?;
        sqlx::query(CREATE_MEMBERS).execute(pool).await?;
        sqlx::query(CREATE_MEMBERS_USER_INDEX).execute(pool).await?;
        Ok(())
    }

    async fn reduce(&self, event: &StoreEvent, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        match &event.payload {
            EventPayload::InstanceMemberAdded(MemberAdded { user_id, roles })
            | EventPayload::InstanceMemberChanged(MemberChanged { user_id, roles }) => {
                self.upsert(tx, event, MemberKind::Instance, &event.aggregate_id, user_id, roles)
                    .await?;
            }
            EventPayload::InstanceMemberRemoved(MemberRemoved { user_id }) => {
                self.remove(tx, event, MemberKind::Instance, &event.aggregate_id, user_id)
                    .await?;
            }
            EventPayload::OrgMemberAdded(MemberAdded { user_id, roles })
            | EventPayload::OrgMemberChanged(MemberChanged { user_id, roles }) => {
                self.upsert(tx, event, MemberKind::Org, &event.aggregate_id, user_id, roles)
                    .await?;
            }
            EventPayload::OrgMemberRemoved(MemberRemoved { user_id }) => {
                self.remove(tx, event, MemberKind::Org, &event.aggregate_id, user_id)
                    .await?;
            }
            EventPayload::ProjectMemberAdded(MemberAdded { user_id, roles })
            | EventPayload::ProjectMemberChanged(MemberChanged { user_id, roles }) => {
                self.upsert(tx, event, MemberKind::Project, &event.aggregate_id, user_id, roles)
                    .await?;
            }
            EventPayload::ProjectMemberRemoved(MemberRemoved { user_id }) => {
                self.remove(tx, event, MemberKind::Project, &event.aggregate_id, user_id)
                    .await?;
            }
            EventPayload::ProjectGrantMemberAdded(added) => {
                self.upsert(
                    tx,
                    event,
                    MemberKind::ProjectGrant,
                    &added.grant_id,
                    &added.user_id,
                    &added.roles,
                )
                .await?;
            }
            EventPayload::ProjectGrantMemberChanged(changed) => {
                self.upsert(
                    tx,
                    event,
                    MemberKind::ProjectGrant,
                    &changed.grant_id,
                    &changed.user_id,
                    &changed.roles,
                )
                .await?;
            }
            EventPayload::ProjectGrantMemberRemoved(removed) => {
                self.remove(tx, event, MemberKind::ProjectGrant, &removed.grant_id, &removed.user_id)
                    .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn reset(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query("TRUNCATE projections.members").execute(&mut **tx).await?;
        Ok(())
    }
}

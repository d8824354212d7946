//! Organization read model: `projections.orgs` and
//! `projections.org_domains`.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::config::ProjectionConfig;
use crate::error::Result;
use crate::event::{EventPayload, StoreEvent};
use crate::projection::Projection;
use crate::types::ObjectState;

pub const NAME: &str = "orgs";

const CREATE_ORGS: &str = "
    CREATE TABLE IF NOT EXISTS projections.orgs
    (
      instance_id TEXT NOT NULL,
      id TEXT NOT NULL,
      name TEXT NOT NULL,
      state TEXT NOT NULL DEFAULT 'active',
      primary_domain TEXT,
      sequence BIGINT NOT NULL DEFAULT 0,
      created_at TIMESTAMPTZ NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL,
      CONSTRAINT orgs_pkey PRIMARY KEY (instance_id, id)
    )";

const CREATE_ORG_DOMAINS: &str = "
    CREATE TABLE IF NOT EXISTS projections.org_domains
    (
      instance_id TEXT NOT NULL,
      org_id TEXT NOT NULL,
      domain TEXT NOT NULL,
      is_verified BOOLEAN NOT NULL DEFAULT FALSE,
      is_primary BOOLEAN NOT NULL DEFAULT FALSE,
      validation_type TEXT NOT NULL DEFAULT '',
      validation_code TEXT,
      created_at TIMESTAMPTZ NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL,
      CONSTRAINT org_domains_pkey PRIMARY KEY (instance_id, org_id, domain)
    )";

const CREATE_ORG_DOMAINS_DOMAIN_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS org_domains_domain ON projections.org_domains (instance_id, domain)";

pub fn config() -> ProjectionConfig {
    ProjectionConfig::builder()
        .name(NAME)
        .tables(vec![
            "projections.orgs".to_owned(),
            "projections.org_domains".to_owned(),
        ])
        .aggregate_types(vec!["org".to_owned()])
        .build()
}

/// Reducer for the org aggregate (member events are owned by the member
/// projection, not here).
#[derive(Debug, Default, Clone)]
pub struct OrgProjection;

impl OrgProjection {
    async fn set_state(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoreEvent,
        state: ObjectState,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE projections.orgs
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
impl Projection for OrgProjection {
    async fn init(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(crate::sql::statements::CREATE_PROJECTIONS_SCHEMA)
            .execute(pool)
            .await?;
        sqlx::query(CREATE_ORGS).execute(pool).await?;
        sqlx::query(CREATE_ORG_DOMAINS).execute(pool).await?;
        sqlx::query(CREATE_ORG_DOMAINS_DOMAIN_INDEX).execute(pool).await?;
        Ok(())
    }

    async fn reduce(&self, event: &StoreEvent, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        match &event.payload {
            EventPayload::OrgAdded(added) => {
                sqlx::query(
                    "INSERT INTO projections.orgs
                     (instance_id, id, name, state, sequence, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $6)
                     ON CONFLICT (instance_id, id) DO NOTHING",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&added.name)
                .bind(ObjectState::Active.as_str())
                .bind(event.aggregate_version)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::OrgChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.orgs
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
            EventPayload::OrgDeactivated(_) => {
                self.set_state(tx, event, ObjectState::Inactive).await?;
            }
            EventPayload::OrgReactivated(_) => {
                self.set_state(tx, event, ObjectState::Active).await?;
            }
            EventPayload::OrgRemoved(_) => {
                self.set_state(tx, event, ObjectState::Removed).await?;
            }
            EventPayload::OrgDomainAdded(added) => {
                sqlx::query(
                    "INSERT INTO projections.org_domains
                     (instance_id, org_id, domain, validation_type, validation_code, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $6)
                     ON CONFLICT (instance_id, org_id, domain) DO NOTHING",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&added.domain)
                .bind(&added.validation_type)
                .bind(&added.validation_code)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::OrgDomainVerified(verified) => {
                sqlx::query(
                    "UPDATE projections.org_domains
                     SET is_verified = TRUE, updated_at = $4
                     WHERE instance_id = $1 AND org_id = $2 AND domain = $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&verified.domain)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::OrgDomainPrimarySet(primary) => {
                sqlx::query(
                    "UPDATE projections.org_domains
                     SET is_primary = (domain = $3), updated_at = $4
                     WHERE instance_id = $1 AND org_id = $2",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&primary.domain)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;

                sqlx::query(
                    "UPDATE projections.orgs
                     SET primary_domain = $4, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&primary.domain)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::OrgDomainRemoved(removed) => {
                sqlx::query(
                    "DELETE FROM projections.org_domains
                     WHERE instance_id = $1 AND org_id = $2 AND domain = $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&removed.domain)
                .execute(&mut **tx)
                .await?;
            }
            _ => {}
        }
        Ok(())
    }

    async fn reset(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query("TRUNCATE projections.orgs").execute(&mut **tx).await?;
        sqlx::query("TRUNCATE projections.org_domains").execute(&mut **tx).await?;
        Ok(())
    }
}

//! User read model: `projections.users` and `projections.machine_keys`.

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::config::ProjectionConfig;
use crate::error::Result;
use crate::event::{EventPayload, StoreEvent};
use crate::projection::Projection;
use crate::types::UserState;

pub const NAME: &str = "users";

const CREATE_USERS: &str = "
    CREATE TABLE IF NOT EXISTS projections.users
    (
      instance_id TEXT NOT NULL,
      id TEXT NOT NULL,
      org_id TEXT NOT NULL,
      username TEXT NOT NULL,
      first_name TEXT NOT NULL DEFAULT '',
      last_name TEXT NOT NULL DEFAULT '',
      display_name TEXT,
      preferred_language TEXT,
      email TEXT NOT NULL DEFAULT '',
      email_verified BOOLEAN NOT NULL DEFAULT FALSE,
      phone TEXT,
      state TEXT NOT NULL DEFAULT 'active',
      password_hash TEXT,
      otp_secret TEXT,
      otp_verified BOOLEAN NOT NULL DEFAULT FALSE,
      sequence BIGINT NOT NULL DEFAULT 0,
      created_at TIMESTAMPTZ NOT NULL,
      updated_at TIMESTAMPTZ NOT NULL,
      CONSTRAINT users_pkey PRIMARY KEY (instance_id, id)
    )";

const CREATE_USERS_USERNAME_INDEX: &str = "
    CREATE INDEX IF NOT EXISTS users_username ON projections.users (instance_id, username)";

const CREATE_MACHINE_KEYS: &str = "
    CREATE TABLE IF NOT EXISTS projections.machine_keys
    (
      instance_id TEXT NOT NULL,
      user_id TEXT NOT NULL,
      key_id TEXT NOT NULL,
      key_type TEXT NOT NULL,
      public_key TEXT NOT NULL,
      expiration_date TIMESTAMPTZ,
      created_at TIMESTAMPTZ NOT NULL,
      CONSTRAINT machine_keys_pkey PRIMARY KEY (instance_id, user_id, key_id)
    )";

/// Default wiring for this projection.
pub fn config() -> ProjectionConfig {
    ProjectionConfig::builder()
        .name(NAME)
        .tables(vec![
            "projections.users".to_owned(),
            "projections.machine_keys".to_owned(),
        ])
        .aggregate_types(vec!["user".to_owned()])
        .build()
}

/// Reducer for the user aggregate.
#[derive(Debug, Default, Clone)]
pub struct UserProjection;

impl UserProjection {
    async fn set_state(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        event: &StoreEvent,
        state: UserState,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE projections.users
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
impl Projection for UserProjection {
    async fn init(&self, pool: &PgPool) -> Result<()> {
        sqlx::query(crate::sql::statements::CREATE_PROJECTIONS_SCHEMA)
            .execute(pool)
            .await?;
        sqlx::query(CREATE_USERS).execute(pool).await?;
        sqlx::query(CREATE_USERS_USERNAME_INDEX).execute(pool).await?;
        sqlx::query(CREATE_MACHINE_KEYS).execute(pool).await?;
        Ok(())
    }

    async fn reduce(&self, event: &StoreEvent, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        match &event.payload {
            EventPayload::HumanUserAdded(added) => {
                sqlx::query(
                    "INSERT INTO projections.users
                     (instance_id, id, org_id, username, first_name, last_name, display_name,
                      preferred_language, email, phone, state, password_hash, sequence, created_at, updated_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
                     ON CONFLICT (instance_id, id) DO NOTHING",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&event.resource_owner)
                .bind(&added.username)
                .bind(&added.first_name)
                .bind(&added.last_name)
                .bind(&added.display_name)
                .bind(&added.preferred_language)
                .bind(&added.email)
                .bind(&added.phone)
                .bind(UserState::Active.as_str())
                .bind(&added.password_hash)
                .bind(event.aggregate_version)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::HumanProfileChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.users
                     SET first_name = COALESCE($4, first_name),
                         last_name = COALESCE($5, last_name),
                         display_name = COALESCE($6, display_name),
                         preferred_language = COALESCE($7, preferred_language),
                         sequence = $3, updated_at = $8
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&changed.first_name)
                .bind(&changed.last_name)
                .bind(&changed.display_name)
                .bind(&changed.preferred_language)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::HumanEmailChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.users
                     SET email = $4, email_verified = $5, sequence = $3, updated_at = $6
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&changed.email)
                .bind(changed.is_verified)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::HumanPhoneChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.users
                     SET phone = $4, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&changed.phone)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::HumanPhoneRemoved(_) => {
                sqlx::query(
                    "UPDATE projections.users
                     SET phone = NULL, sequence = $3, updated_at = $4
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::UsernameChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.users
                     SET username = $4, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&changed.username)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::HumanPasswordChanged(changed) => {
                sqlx::query(
                    "UPDATE projections.users
                     SET password_hash = $4, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&changed.password_hash)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::HumanOtpAdded(added) => {
                sqlx::query(
                    "UPDATE projections.users
                     SET otp_secret = $4, otp_verified = FALSE, sequence = $3, updated_at = $5
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(&added.secret)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::HumanOtpVerified(_) => {
                sqlx::query(
                    "UPDATE projections.users
                     SET otp_verified = TRUE, sequence = $3, updated_at = $4
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::HumanOtpRemoved(_) => {
                sqlx::query(
                    "UPDATE projections.users
                     SET otp_secret = NULL, otp_verified = FALSE, sequence = $3, updated_at = $4
                     WHERE instance_id = $1 AND id = $2 AND sequence < $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::UserDeactivated(_) => {
                self.set_state(tx, event, UserState::Inactive).await?;
            }
            EventPayload::UserReactivated(_) | EventPayload::UserUnlocked(_) => {
                self.set_state(tx, event, UserState::Active).await?;
            }
            EventPayload::UserLocked(_) => {
                self.set_state(tx, event, UserState::Locked).await?;
            }
            EventPayload::UserRemoved(_) => {
                // Tombstone: the row stays for audit.
                self.set_state(tx, event, UserState::Removed).await?;
            }
            EventPayload::MachineKeyAdded(added) => {
                sqlx::query(
                    "INSERT INTO projections.machine_keys
                     (instance_id, user_id, key_id, key_type, public_key, expiration_date, created_at)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     ON CONFLICT (instance_id, user_id, key_id) DO NOTHING",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&added.key_id)
                .bind(&added.key_type)
                .bind(&added.public_key)
                .bind(added.expiration_date)
                .bind(event.creation_date)
                .execute(&mut **tx)
                .await?;
            }
            EventPayload::MachineKeyRemoved(removed) => {
                sqlx::query(
                    "DELETE FROM projections.machine_keys
                     WHERE instance_id = $1 AND user_id = $2 AND key_id = $3",
                )
                .bind(&event.instance_id)
                .bind(&event.aggregate_id)
                .bind(&removed.key_id)
                .execute(&mut **tx)
                .await?;
            }
            // Other user events (and opaque payloads) have no effect on
            // this read model.
            _ => {}
        }
        Ok(())
    }

    async fn reset(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()> {
        sqlx::query("TRUNCATE projections.users").execute(&mut **tx).await?;
        sqlx::query("TRUNCATE projections.machine_keys").execute(&mut **tx).await?;
        Ok(())
    }
}

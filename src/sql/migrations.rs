//! Idempotent setup of the core tables.

use sqlx::postgres::PgQueryResult;
use sqlx::{PgPool, Postgres, Transaction};

use super::statements;

/// Runs all core DDL atomically. Every statement is idempotent, so this
/// is safe to run on each startup; read-model tables are created by the
/// projections owning them, not here.
pub struct Migrations;

impl Migrations {
    pub async fn run(pool: &PgPool) -> Result<(), sqlx::Error> {
        let mut transaction: Transaction<Postgres> = pool.begin().await?;

        let migrations: [&str; 9] = [
            statements::CREATE_EVENTS_TABLE,
            statements::CREATE_EVENTS_POSITION_SEQUENCE,
            statements::CREATE_EVENTS_AGGREGATE_INDEX,
            statements::CREATE_EVENTS_POSITION_INDEX,
            statements::CREATE_EVENTS_TYPE_INDEX,
            statements::CREATE_PROJECTION_STATES_TABLE,
            statements::CREATE_PROJECTION_FAILED_EVENTS_TABLE,
            statements::CREATE_PROJECTIONS_SCHEMA,
            statements::CREATE_KV_TABLE,
        ];

        for migration in migrations {
            let _: PgQueryResult = sqlx::query(migration).execute(&mut *transaction).await?;
        }

        transaction.commit().await
    }
}

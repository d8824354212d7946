//! Projection bookkeeping: position cursors and the failed-event
//! quarantine. All writes happen inside the handler's iteration
//! transaction so cursor and read-model mutations commit atomically.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

use crate::error::Result;
use crate::event::StoreEvent;
use crate::sql::statements;
use crate::types::Position;

/// One quarantined event of one projection.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FailedEvent {
    pub projection_name: String,
    pub failed_sequence: i64,
    pub failed_in_position_order: i32,
    pub failure_count: i32,
    pub error: String,
    pub event_data: Value,
    pub last_failed: DateTime<Utc>,
    pub instance_id: String,
}

impl FailedEvent {
    /// A failure count at or beyond the projection's `max_retries` marks
    /// the record permanent; reprocessing is an operator action.
    pub fn is_permanent(&self, max_retries: i32) -> bool {
        self.failure_count >= max_retries
    }
}

/// Reads the cursor of `(projection, instance)`; genesis when absent.
pub async fn fetch_position(
    connection: &mut PgConnection,
    projection_name: &str,
    instance_id: &str,
) -> Result<Position> {
    let row: Option<(i64, i32)> = sqlx::query_as(statements::SELECT_PROJECTION_STATE)
        .bind(projection_name)
        .bind(instance_id)
        .fetch_optional(connection)
        .await?;
    Ok(row
        .map(|(position, in_position_order)| Position::new(position, in_position_order))
        .unwrap_or_else(Position::genesis))
}

pub async fn persist_position(
    connection: &mut PgConnection,
    projection_name: &str,
    instance_id: &str,
    position: Position,
) -> Result<()> {
    sqlx::query(statements::UPSERT_PROJECTION_STATE)
        .bind(projection_name)
        .bind(instance_id)
        .bind(position.position)
        .bind(position.in_position_order)
        .execute(connection)
        .await?;
    Ok(())
}

pub async fn reset_position(
    connection: &mut PgConnection,
    projection_name: &str,
    instance_id: &str,
) -> Result<()> {
    sqlx::query(statements::RESET_PROJECTION_STATE)
        .bind(projection_name)
        .bind(instance_id)
        .execute(connection)
        .await?;
    Ok(())
}

/// Upserts the quarantine record for a poison event, bumping its
/// failure count on repeats.
pub async fn record_failure(
    connection: &mut PgConnection,
    projection_name: &str,
    event: &StoreEvent,
    error: &str,
) -> Result<()> {
    let event_data = event.payload.to_json()?;
    sqlx::query(statements::UPSERT_FAILED_EVENT)
        .bind(projection_name)
        .bind(event.position.position)
        .bind(event.position.in_position_order)
        .bind(error)
        .bind(sqlx::types::Json(event_data))
        .bind(&event.instance_id)
        .execute(connection)
        .await?;
    Ok(())
}

/// Quarantined events of one projection, oldest first.
pub async fn failed_events(pool: &PgPool, projection_name: &str) -> Result<Vec<FailedEvent>> {
    Ok(sqlx::query_as::<_, FailedEvent>(statements::SELECT_FAILED_EVENTS)
        .bind(projection_name)
        .fetch_all(pool)
        .await?)
}

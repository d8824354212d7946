//! Event representation on the event log table.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::event::{EventPayload, StoreEvent};
use crate::types::{AggregateKind, Position};

/// Raw `events` row.
#[derive(sqlx::FromRow, Debug)]
pub struct DbEvent {
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub aggregate_version: i64,
    pub event_data: Value,
    pub editor_user: String,
    pub resource_owner: String,
    pub instance_id: String,
    pub position: i64,
    pub in_position_order: i32,
    pub creation_date: DateTime<Utc>,
    pub revision: i16,
}

impl From<DbEvent> for StoreEvent {
    fn from(row: DbEvent) -> Self {
        StoreEvent {
            id: row.id,
            payload: EventPayload::from_parts(row.event_type.as_str(), row.event_data),
            event_type: row.event_type,
            aggregate_type: AggregateKind::from(row.aggregate_type.as_str()),
            aggregate_id: row.aggregate_id,
            aggregate_version: row.aggregate_version,
            editor: row.editor_user,
            resource_owner: row.resource_owner,
            instance_id: row.instance_id,
            position: Position::new(row.position, row.in_position_order),
            creation_date: row.creation_date,
            revision: row.revision,
        }
    }
}

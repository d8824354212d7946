//! The event model: commands going into the store, persisted events
//! coming out, and the typed payload union.

mod payload;

pub use payload::*;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::types::{AggregateKind, AggregateVersion, Position};

/// The immutable fact persisted in the log.
#[derive(Debug, Clone)]
pub struct StoreEvent {
    /// Uniquely identifies the event among all events of all aggregates.
    pub id: Uuid,
    pub event_type: String,
    pub aggregate_type: AggregateKind,
    pub aggregate_id: String,
    /// Per-aggregate monotonic counter, starting at 1, no gaps.
    pub aggregate_version: AggregateVersion,
    /// Typed payload; unknown event types decode to [`EventPayload::Opaque`].
    pub payload: EventPayload,
    /// User or service that caused the event.
    pub editor: String,
    /// Owning org or instance id.
    pub resource_owner: String,
    /// Tenant boundary.
    pub instance_id: String,
    /// Place in the global log order.
    pub position: Position,
    pub creation_date: DateTime<Utc>,
    /// Schema version of the payload.
    pub revision: i16,
}

impl StoreEvent {
    pub const fn position(&self) -> Position {
        self.position
    }
}

/// A command to append one event, produced by the command layer.
///
/// The event type, aggregate type and revision are derived from the
/// payload; the store assigns id, version and position.
#[derive(Debug, Clone)]
pub struct EventCommand {
    pub aggregate_id: String,
    pub payload: EventPayload,
    pub editor: String,
    pub resource_owner: String,
    pub instance_id: String,
}

impl EventCommand {
    pub fn new(
        aggregate_id: impl Into<String>,
        payload: EventPayload,
        editor: impl Into<String>,
        resource_owner: impl Into<String>,
        instance_id: impl Into<String>,
    ) -> Self {
        Self {
            aggregate_id: aggregate_id.into(),
            payload,
            editor: editor.into(),
            resource_owner: resource_owner.into(),
            instance_id: instance_id.into(),
        }
    }

    pub fn aggregate_type(&self) -> AggregateKind {
        self.payload.aggregate_kind()
    }

    pub fn event_type(&self) -> String {
        self.payload.event_type()
    }
}

/// The full history of one aggregate, as returned by
/// [`crate::store::EventStore::aggregate`].
#[derive(Debug, Clone)]
pub struct AggregateHistory {
    pub id: String,
    pub kind: AggregateKind,
    /// Highest applied event's `aggregate_version`; 0 for an aggregate
    /// with no events (which is never returned, `None` is).
    pub version: AggregateVersion,
    pub events: Vec<StoreEvent>,
}

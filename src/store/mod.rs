//! The eventstore contract and its shared filter model.
//!
//! Two implementations ship: [`postgres::PgEventStore`] for production
//! and [`memory::MemoryEventStore`] for tests and embedded use. Both are
//! exercised by the same conformance suite.

pub mod memory;
pub mod postgres;

pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::{Error, Result};
use crate::event::{AggregateHistory, EventCommand, StoreEvent};
use crate::types::{AggregateKind, AggregateVersion, Position};

/// Filter over the event log. Empty vectors mean "no restriction".
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub aggregate_types: Vec<AggregateKind>,
    pub aggregate_ids: Vec<String>,
    pub event_types: Vec<String>,
    pub resource_owner: Option<String>,
    pub instance_id: Option<String>,
    pub from_position: Option<Position>,
    pub limit: Option<i64>,
    pub descending: bool,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn aggregate_type(mut self, kind: AggregateKind) -> Self {
        self.aggregate_types.push(kind);
        self
    }

    pub fn aggregate_id(mut self, id: impl Into<String>) -> Self {
        self.aggregate_ids.push(id.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_types.push(event_type.into());
        self
    }

    pub fn resource_owner(mut self, owner: impl Into<String>) -> Self {
        self.resource_owner = Some(owner.into());
        self
    }

    pub fn instance(mut self, instance_id: impl Into<String>) -> Self {
        self.instance_id = Some(instance_id.into());
        self
    }

    pub fn from_position(mut self, position: Position) -> Self {
        self.from_position = Some(position);
        self
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn descending(mut self) -> Self {
        self.descending = true;
        self
    }

    /// In-memory predicate equivalent of the SQL this filter compiles to.
    pub fn matches(&self, event: &StoreEvent) -> bool {
        if !self.aggregate_types.is_empty() && !self.aggregate_types.contains(&event.aggregate_type) {
            return false;
        }
        if !self.aggregate_ids.is_empty() && !self.aggregate_ids.contains(&event.aggregate_id) {
            return false;
        }
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }
        if let Some(owner) = &self.resource_owner {
            if &event.resource_owner != owner {
                return false;
            }
        }
        if let Some(instance) = &self.instance_id {
            if &event.instance_id != instance {
                return false;
            }
        }
        if let Some(from) = self.from_position {
            if event.position <= from {
                return false;
            }
        }
        true
    }
}

/// Append-only, strictly ordered event log with optimistic concurrency
/// control on aggregates.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Appends a single command; shorthand for [`EventStore::push_many`].
    async fn push(&self, command: EventCommand) -> Result<StoreEvent>;

    /// Appends a batch of commands for one aggregate, assigning ids,
    /// versions and one position shared by the whole batch.
    ///
    /// The current version is read inside the same locked transaction,
    /// so unchecked pushes append at head without ever creating gaps.
    async fn push_many(&self, commands: Vec<EventCommand>) -> Result<Vec<StoreEvent>>;

    /// Like [`EventStore::push_many`], but fails with
    /// [`Error::Concurrency`] unless the aggregate's current version
    /// equals `expected_version`.
    async fn push_with_concurrency_check(
        &self,
        commands: Vec<EventCommand>,
        expected_version: AggregateVersion,
    ) -> Result<Vec<StoreEvent>>;

    /// Events matching the filter, in position order (or descending when
    /// the filter says so).
    async fn events(&self, filter: &EventFilter) -> Result<Vec<StoreEvent>>;

    /// The newest event of one aggregate, if any.
    async fn latest_event(
        &self,
        instance_id: &str,
        kind: &AggregateKind,
        aggregate_id: &str,
    ) -> Result<Option<StoreEvent>>;

    /// Full history of one aggregate, optionally capped at
    /// `until_version`. `None` when the aggregate has no events.
    async fn aggregate(
        &self,
        instance_id: &str,
        kind: &AggregateKind,
        aggregate_id: &str,
        until_version: Option<AggregateVersion>,
    ) -> Result<Option<AggregateHistory>>;

    /// Events strictly after `position` in `(position, in_position_order)`
    /// order, ascending, at most `limit` rows.
    async fn events_after_position(&self, position: Position, limit: i64) -> Result<Vec<StoreEvent>>;

    /// Number of events matching the filter.
    async fn count(&self, filter: &EventFilter) -> Result<i64>;

    /// Disjunction of filters (UNION semantics), position-ordered.
    async fn search(&self, filters: &[EventFilter]) -> Result<Vec<StoreEvent>>;

    /// Highest position in the log; 0 when empty. The projection
    /// engine's lag oracle.
    async fn max_position(&self) -> Result<i64>;

    /// Receiver of committed events, when subscriptions are enabled.
    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>>;

    async fn health(&self) -> bool;

    /// Stops accepting work and releases resources.
    async fn close(&self);
}

/// Batch validation shared by both implementations: rejects empty and
/// oversized batches, mixed aggregates, and missing identifiers.
pub(crate) fn validate_batch(
    commands: &[EventCommand],
    max_push_batch_size: usize,
) -> Result<(AggregateKind, String, String)> {
    let first = commands
        .first()
        .ok_or_else(|| Error::validation("commands", "batch must contain at least one command"))?;

    if commands.len() > max_push_batch_size {
        return Err(Error::validation(
            "commands",
            format!(
                "batch of {} exceeds maximum push batch size {}",
                commands.len(),
                max_push_batch_size
            ),
        ));
    }

    let kind = first.aggregate_type();
    let aggregate_id = first.aggregate_id.clone();
    let instance_id = first.instance_id.clone();

    if aggregate_id.is_empty() {
        return Err(Error::validation("aggregate_id", "must not be empty"));
    }
    if instance_id.is_empty() {
        return Err(Error::validation("instance_id", "must not be empty"));
    }

    for command in commands {
        if command.editor.is_empty() {
            return Err(Error::validation("editor", "must not be empty"));
        }
        if command.resource_owner.is_empty() {
            return Err(Error::validation("resource_owner", "must not be empty"));
        }
        if command.aggregate_type() != kind || command.aggregate_id != aggregate_id {
            return Err(Error::validation(
                "commands",
                "all commands in a batch must target the same aggregate",
            ));
        }
        if command.instance_id != instance_id {
            return Err(Error::validation(
                "commands",
                "all commands in a batch must share one instance",
            ));
        }
    }

    Ok((kind, aggregate_id, instance_id))
}

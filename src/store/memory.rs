//! In-memory implementation of the [`EventStore`].
//!
//! Shares the semantics of the Postgres store — same validation, same
//! version and position assignment, same concurrency failure — so the
//! conformance suite runs against both. Intended for tests and embedded
//! tooling, not production.

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use crate::config::EventStoreConfig;
use crate::error::{Error, Result};
use crate::event::{AggregateHistory, EventCommand, StoreEvent};
use crate::store::{validate_batch, EventFilter, EventStore};
use crate::types::{AggregateKind, AggregateVersion, Position};

#[derive(Default)]
struct Log {
    events: Vec<StoreEvent>,
    next_position: i64,
}

/// Append-only log held in process memory behind one async mutex; the
/// mutex plays the role of the per-aggregate row lock.
pub struct MemoryEventStore {
    log: Mutex<Log>,
    config: EventStoreConfig,
    subscriptions: Option<broadcast::Sender<StoreEvent>>,
}

impl MemoryEventStore {
    pub fn new(config: EventStoreConfig) -> Self {
        let subscriptions = config
            .enable_subscriptions
            .then(|| broadcast::channel(1024).0);
        Self {
            log: Mutex::new(Log::default()),
            config,
            subscriptions,
        }
    }

    async fn append(
        &self,
        commands: Vec<EventCommand>,
        expected_version: Option<AggregateVersion>,
    ) -> Result<Vec<StoreEvent>> {
        let (kind, aggregate_id, instance_id) =
            validate_batch(&commands, self.config.max_push_batch_size)?;

        let mut log = self.log.lock().await;

        let current = log
            .events
            .iter()
            .filter(|event| {
                event.instance_id == instance_id
                    && event.aggregate_type == kind
                    && event.aggregate_id == aggregate_id
            })
            .map(|event| event.aggregate_version)
            .max()
            .unwrap_or(0);

        if let Some(expected) = expected_version {
            if current != expected {
                return Err(Error::Concurrency {
                    expected,
                    actual: current,
                });
            }
        }

        log.next_position += 1;
        let position = log.next_position;
        let creation_date = Utc::now();

        let mut store_events = Vec::with_capacity(commands.len());
        for (index, command) in commands.into_iter().enumerate() {
            let event = StoreEvent {
                id: Uuid::new_v4(),
                event_type: command.event_type(),
                aggregate_type: kind.clone(),
                aggregate_id: aggregate_id.clone(),
                aggregate_version: current + index as i64 + 1,
                editor: command.editor,
                resource_owner: command.resource_owner,
                instance_id: command.instance_id,
                position: Position::new(position, index as i32),
                creation_date,
                revision: command.payload.revision(),
                payload: command.payload,
            };
            log.events.push(event.clone());
            store_events.push(event);
        }
        drop(log);

        if let Some(sender) = &self.subscriptions {
            for event in &store_events {
                let _ = sender.send(event.clone());
            }
        }

        Ok(store_events)
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new(EventStoreConfig::default())
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn push(&self, command: EventCommand) -> Result<StoreEvent> {
        let mut events = self.push_many(vec![command]).await?;
        Ok(events.remove(0))
    }

    async fn push_many(&self, commands: Vec<EventCommand>) -> Result<Vec<StoreEvent>> {
        self.append(commands, None).await
    }

    async fn push_with_concurrency_check(
        &self,
        commands: Vec<EventCommand>,
        expected_version: AggregateVersion,
    ) -> Result<Vec<StoreEvent>> {
        self.append(commands, Some(expected_version)).await
    }

    async fn events(&self, filter: &EventFilter) -> Result<Vec<StoreEvent>> {
        let log = self.log.lock().await;
        let mut events: Vec<StoreEvent> = log
            .events
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();
        events.sort_by_key(|event| event.position);
        if filter.descending {
            events.reverse();
        }
        if let Some(limit) = filter.limit {
            events.truncate(limit.max(0) as usize);
        }
        Ok(events)
    }

    async fn latest_event(
        &self,
        instance_id: &str,
        kind: &AggregateKind,
        aggregate_id: &str,
    ) -> Result<Option<StoreEvent>> {
        let log = self.log.lock().await;
        Ok(log
            .events
            .iter()
            .filter(|event| {
                event.instance_id == instance_id
                    && &event.aggregate_type == kind
                    && event.aggregate_id == aggregate_id
            })
            .max_by_key(|event| event.aggregate_version)
            .cloned())
    }

    async fn aggregate(
        &self,
        instance_id: &str,
        kind: &AggregateKind,
        aggregate_id: &str,
        until_version: Option<AggregateVersion>,
    ) -> Result<Option<AggregateHistory>> {
        let log = self.log.lock().await;
        let mut events: Vec<StoreEvent> = log
            .events
            .iter()
            .filter(|event| {
                event.instance_id == instance_id
                    && &event.aggregate_type == kind
                    && event.aggregate_id == aggregate_id
                    && until_version.map_or(true, |until| event.aggregate_version <= until)
            })
            .cloned()
            .collect();
        events.sort_by_key(|event| event.aggregate_version);

        Ok(events.last().map(|last| AggregateHistory {
            id: aggregate_id.to_owned(),
            kind: kind.clone(),
            version: last.aggregate_version,
            events: events.clone(),
        }))
    }

    async fn events_after_position(&self, position: Position, limit: i64) -> Result<Vec<StoreEvent>> {
        let log = self.log.lock().await;
        let mut events: Vec<StoreEvent> = log
            .events
            .iter()
            .filter(|event| event.position > position)
            .cloned()
            .collect();
        events.sort_by_key(|event| event.position);
        events.truncate(limit.max(0) as usize);
        Ok(events)
    }

    async fn count(&self, filter: &EventFilter) -> Result<i64> {
        let log = self.log.lock().await;
        Ok(log.events.iter().filter(|event| filter.matches(event)).count() as i64)
    }

    async fn search(&self, filters: &[EventFilter]) -> Result<Vec<StoreEvent>> {
        let mut merged: std::collections::BTreeMap<(Position, Uuid), StoreEvent> =
            std::collections::BTreeMap::new();
        for filter in filters {
            for event in self.events(filter).await? {
                merged.insert((event.position, event.id), event);
            }
        }
        Ok(merged.into_values().collect())
    }

    async fn max_position(&self) -> Result<i64> {
        let log = self.log.lock().await;
        Ok(log.events.iter().map(|event| event.position.position).max().unwrap_or(0))
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        self.subscriptions.as_ref().map(|sender| sender.subscribe())
    }

    async fn health(&self) -> bool {
        true
    }

    async fn close(&self) {}
}

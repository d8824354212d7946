//! Postgres implementation of the [`EventStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::config::EventStoreConfig;
use crate::error::{Error, Result};
use crate::event::{AggregateHistory, EventCommand, StoreEvent};
use crate::sql::event::DbEvent;
use crate::sql::{pool as db, statements};
use crate::store::{validate_batch, EventFilter, EventStore};
use crate::types::{AggregateKind, AggregateVersion, Position};

/// Capacity of the subscription channel; slow subscribers lag and miss
/// events rather than blocking appends.
const SUBSCRIPTION_BUFFER: usize = 1024;

/// Advisory-lock key serializing position assignment across all
/// appending transactions.
const POSITION_LOCK_KEY: i64 = 0x5354_524f_4e47;

/// Default Postgres implementation of the [`EventStore`], persisting all
/// aggregates into one `events` table ordered by a global position
/// sequence.
///
/// Cloning is cheap: clones share the pool and the subscription channel.
#[derive(Clone)]
pub struct PgEventStore {
    pool: PgPool,
    config: EventStoreConfig,
    subscriptions: Option<broadcast::Sender<StoreEvent>>,
}

impl PgEventStore {
    /// Runs the core migrations and returns a ready store.
    pub async fn new(pool: PgPool, config: EventStoreConfig) -> Result<Self> {
        crate::sql::migrations::Migrations::run(&pool).await?;
        Ok(Self::without_running_migrations(pool, config))
    }

    /// Builds the store assuming the schema is already in place.
    pub fn without_running_migrations(pool: PgPool, config: EventStoreConfig) -> Self {
        let subscriptions = config
            .enable_subscriptions
            .then(|| broadcast::channel(SUBSCRIPTION_BUFFER).0);
        Self {
            pool,
            config,
            subscriptions,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Streams the whole log in position order; used by rebuilds.
    pub fn stream_all(&self) -> BoxStream<'_, Result<StoreEvent>> {
        Box::pin(
            sqlx::query_as::<_, DbEvent>(statements::SELECT_ALL_ORDERED)
                .fetch(&self.pool)
                .map(|row| Ok(StoreEvent::from(row.map_err(Error::from)?))),
        )
    }

    /// The append critical section: serializes writers on the position
    /// lock, reads the aggregate's head version, then inserts the batch
    /// under one freshly assigned position.
    async fn append(
        &self,
        commands: Vec<EventCommand>,
        expected_version: Option<AggregateVersion>,
    ) -> Result<Vec<StoreEvent>> {
        let (kind, aggregate_id, instance_id) =
            validate_batch(&commands, self.config.max_push_batch_size)?;

        let mut transaction: Transaction<'_, Postgres> = self.pool.begin().await?;

        // All appends serialize on one transaction-scoped lock. This
        // keeps position order identical to commit order (no event can
        // become visible below an already-visible position) and covers
        // the aggregate's first event, which a row lock cannot. Released
        // on commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(POSITION_LOCK_KEY)
            .execute(&mut *transaction)
            .await?;

        let current: Option<i64> = sqlx::query_scalar(statements::SELECT_HEAD_FOR_UPDATE)
            .bind(&instance_id)
            .bind(kind.as_str())
            .bind(&aggregate_id)
            .fetch_optional(&mut *transaction)
            .await?;
        let current = current.unwrap_or(0);

        if let Some(expected) = expected_version {
            if current != expected {
                return Err(Error::Concurrency {
                    expected,
                    actual: current,
                });
            }
        }

        let position: i64 = sqlx::query_scalar(statements::NEXT_POSITION)
            .fetch_one(&mut *transaction)
            .await?;
        let creation_date: DateTime<Utc> = Utc::now();

        let mut store_events: Vec<StoreEvent> = Vec::with_capacity(commands.len());
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

            sqlx::query(statements::INSERT_EVENT)
                .bind(event.id)
                .bind(&event.event_type)
                .bind(event.aggregate_type.as_str())
                .bind(&event.aggregate_id)
                .bind(event.aggregate_version)
                .bind(sqlx::types::Json(event.payload.to_json()?))
                .bind(&event.editor)
                .bind(&event.resource_owner)
                .bind(&event.instance_id)
                .bind(event.position.position)
                .bind(event.position.in_position_order)
                .bind(event.creation_date)
                .bind(event.revision)
                .execute(&mut *transaction)
                .await?;

            store_events.push(event);
        }

        transaction.commit().await?;

        if let Some(sender) = &self.subscriptions {
            for event in &store_events {
                // Lagging receivers are the subscriber's problem.
                let _ = sender.send(event.clone());
            }
        }

        Ok(store_events)
    }

    async fn append_with_timeout(
        &self,
        commands: Vec<EventCommand>,
        expected_version: Option<AggregateVersion>,
    ) -> Result<Vec<StoreEvent>> {
        match tokio::time::timeout(self.config.push_timeout, self.append(commands, expected_version))
            .await
        {
            Ok(result) => result,
            Err(elapsed) => Err(Error::Integration(Box::new(elapsed))),
        }
    }

    /// Compiles a filter into `WHERE` text with `$n` placeholders and the
    /// bind list, in bind order.
    fn compile_filter(filter: &EventFilter) -> (String, Vec<Bind>) {
        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<Bind> = Vec::new();

        if !filter.aggregate_types.is_empty() {
            binds.push(Bind::TextArray(
                filter
                    .aggregate_types
                    .iter()
                    .map(|kind| kind.as_str().to_owned())
                    .collect(),
            ));
            clauses.push(format!("aggregate_type = ANY(${})", binds.len()));
        }
        if !filter.aggregate_ids.is_empty() {
            binds.push(Bind::TextArray(filter.aggregate_ids.clone()));
            clauses.push(format!("aggregate_id = ANY(${})", binds.len()));
        }
        if !filter.event_types.is_empty() {
            binds.push(Bind::TextArray(filter.event_types.clone()));
            clauses.push(format!("event_type = ANY(${})", binds.len()));
        }
        if let Some(owner) = &filter.resource_owner {
            binds.push(Bind::Text(owner.clone()));
            clauses.push(format!("resource_owner = ${}", binds.len()));
        }
        if let Some(instance) = &filter.instance_id {
            binds.push(Bind::Text(instance.clone()));
            clauses.push(format!("instance_id = ${}", binds.len()));
        }
        if let Some(from) = filter.from_position {
            binds.push(Bind::BigInt(from.position));
            binds.push(Bind::Int(from.in_position_order));
            clauses.push(format!(
                "(position, in_position_order) > (${}, ${})",
                binds.len() - 1,
                binds.len()
            ));
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };
        (where_clause, binds)
    }

    fn bind_all<'q, O>(
        mut query: sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments>,
        binds: Vec<Bind>,
    ) -> sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments>
    where
        O: for<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow>,
    {
        for bind in binds {
            query = match bind {
                Bind::TextArray(value) => query.bind(value),
                Bind::Text(value) => query.bind(value),
                Bind::BigInt(value) => query.bind(value),
                Bind::Int(value) => query.bind(value),
            };
        }
        query
    }
}

/// A deferred query parameter, kept in bind order.
#[derive(Debug, Clone)]
enum Bind {
    TextArray(Vec<String>),
    Text(String),
    BigInt(i64),
    Int(i32),
}

#[async_trait]
impl EventStore for PgEventStore {
    async fn push(&self, command: EventCommand) -> Result<StoreEvent> {
        let mut events = self.push_many(vec![command]).await?;
        Ok(events.remove(0))
    }

    #[tracing::instrument(skip_all, fields(batch = commands.len()), err)]
    async fn push_many(&self, commands: Vec<EventCommand>) -> Result<Vec<StoreEvent>> {
        self.append_with_timeout(commands, None).await
    }

    #[tracing::instrument(skip_all, fields(batch = commands.len(), expected = expected_version), err)]
    async fn push_with_concurrency_check(
        &self,
        commands: Vec<EventCommand>,
        expected_version: AggregateVersion,
    ) -> Result<Vec<StoreEvent>> {
        self.append_with_timeout(commands, Some(expected_version)).await
    }

    async fn events(&self, filter: &EventFilter) -> Result<Vec<StoreEvent>> {
        let (where_clause, binds) = Self::compile_filter(filter);

        let order = if filter.descending {
            "position DESC, in_position_order DESC"
        } else {
            "position ASC, in_position_order ASC"
        };
        let mut sql = format!("SELECT * FROM events{where_clause} ORDER BY {order}");
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit.max(0)));
        }

        let query = sqlx::query_as::<_, DbEvent>(&sql);
        let rows = Self::bind_all(query, binds).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(StoreEvent::from).collect())
    }

    async fn latest_event(
        &self,
        instance_id: &str,
        kind: &AggregateKind,
        aggregate_id: &str,
    ) -> Result<Option<StoreEvent>> {
        let row = sqlx::query_as::<_, DbEvent>(statements::SELECT_LATEST_BY_AGGREGATE)
            .bind(instance_id)
            .bind(kind.as_str())
            .bind(aggregate_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(StoreEvent::from))
    }

    async fn aggregate(
        &self,
        instance_id: &str,
        kind: &AggregateKind,
        aggregate_id: &str,
        until_version: Option<AggregateVersion>,
    ) -> Result<Option<AggregateHistory>> {
        let rows = sqlx::query_as::<_, DbEvent>(statements::SELECT_BY_AGGREGATE)
            .bind(instance_id)
            .bind(kind.as_str())
            .bind(aggregate_id)
            .fetch_all(&self.pool)
            .await?;

        let events: Vec<StoreEvent> = rows
            .into_iter()
            .map(StoreEvent::from)
            .filter(|event| until_version.map_or(true, |until| event.aggregate_version <= until))
            .collect();

        let version = events.last().map(|last| last.aggregate_version);
        Ok(version.map(|version| AggregateHistory {
            id: aggregate_id.to_owned(),
            kind: kind.clone(),
            version,
            events,
        }))
    }

    async fn events_after_position(&self, position: Position, limit: i64) -> Result<Vec<StoreEvent>> {
        let rows = sqlx::query_as::<_, DbEvent>(statements::SELECT_AFTER_POSITION)
            .bind(position.position)
            .bind(position.in_position_order)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(StoreEvent::from).collect())
    }

    async fn count(&self, filter: &EventFilter) -> Result<i64> {
        let (where_clause, binds) = Self::compile_filter(filter);
        let sql = format!("SELECT COUNT(*) AS count FROM events{where_clause}");

        #[derive(sqlx::FromRow)]
        struct CountRow {
            count: i64,
        }

        let query = sqlx::query_as::<_, CountRow>(&sql);
        let row = Self::bind_all(query, binds).fetch_one(&self.pool).await?;
        Ok(row.count)
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
        Ok(sqlx::query_scalar(statements::SELECT_MAX_POSITION)
            .fetch_one(&self.pool)
            .await?)
    }

    fn subscribe(&self) -> Option<broadcast::Receiver<StoreEvent>> {
        self.subscriptions.as_ref().map(|sender| sender.subscribe())
    }

    async fn health(&self) -> bool {
        db::health(&self.pool).await
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

impl std::fmt::Debug for PgEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgEventStore")
            .field("config", &self.config)
            .finish()
    }
}

//! One background worker driving one projection.

use std::sync::{Arc, Mutex};

use sqlx::{Acquire, PgPool, Postgres, Transaction};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::ProjectionConfig;
use crate::error::{Error, Result};
use crate::event::StoreEvent;
use crate::projection::{state, Projection};
use crate::sql::event::DbEvent;
use crate::sql::{pool as db, statements};
use crate::types::Position;

/// Consecutive transaction-level failures after which a handler stops
/// itself instead of hammering a broken database.
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

/// Lifecycle of a [`ProjectionHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    Stopped,
    Starting,
    CatchUp,
    Live,
    Stopping,
}

/// Outcome of one iteration of the tailing loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Iteration {
    /// Full batch processed; more events are likely pending.
    Progress,
    /// The log is drained up to the cursor.
    Drained,
    /// Another replica holds the advisory lock this tick.
    Skipped,
}

/// Drives one projection: `Stopped → Starting → CatchUp → Live`,
/// stopping on request or after repeated transaction failures.
pub struct ProjectionHandler {
    pool: PgPool,
    config: ProjectionConfig,
    projection: Arc<dyn Projection>,
    status: Arc<Mutex<HandlerState>>,
    shutdown: watch::Sender<bool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ProjectionHandler {
    pub fn new(pool: PgPool, config: ProjectionConfig, projection: Arc<dyn Projection>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pool,
            config,
            projection,
            status: Arc::new(Mutex::new(HandlerState::Stopped)),
            shutdown,
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    pub fn state(&self) -> HandlerState {
        *self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(status: &Arc<Mutex<HandlerState>>, next: HandlerState) {
        *status.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }

    /// Initializes the owned tables (optionally rebuilding them) and
    /// spawns the tailing loop. Starting a running handler fails.
    #[tracing::instrument(skip(self), fields(projection = %self.config.name), err)]
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut status = self
                .status
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if *status != HandlerState::Stopped {
                return Err(Error::validation("projection", "handler is already running"));
            }
            *status = HandlerState::Starting;
        }

        if let Err(error) = self.initialize().await {
            Self::set_state(&self.status, HandlerState::Stopped);
            return Err(error);
        }

        Self::set_state(&self.status, HandlerState::CatchUp);
        let _ = self.shutdown.send(false);

        let handler = Arc::clone(self);
        let handle = tokio::spawn(async move { handler.run().await });
        *self.task.lock().await = Some(handle);

        Ok(())
    }

    /// Signals the loop, waits for the in-flight iteration and settles
    /// in `Stopped`. Stopping a stopped handler is a no-op.
    pub async fn stop(&self) {
        {
            let mut status = self
                .status
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            match *status {
                HandlerState::Stopped | HandlerState::Stopping => return,
                _ => *status = HandlerState::Stopping,
            }
        }

        let _ = self.shutdown.send(true);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
        Self::set_state(&self.status, HandlerState::Stopped);
    }

    async fn initialize(&self) -> Result<()> {
        self.projection.init(&self.pool).await?;

        if self.config.rebuild_on_start {
            let instance = self.config.instance_id.clone().unwrap_or_default();
            let mut tx = self.pool.begin().await?;
            self.projection.reset(&mut tx).await?;
            state::reset_position(&mut *tx, &self.config.name, &instance).await?;
            tx.commit().await?;
            tracing::info!(projection = %self.config.name, "projection reset for rebuild");
        }
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        let mut consecutive_errors: u32 = 0;
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.iterate().await {
                Ok(Iteration::Progress) => {
                    consecutive_errors = 0;
                    Self::set_state(&self.status, HandlerState::CatchUp);
                    // Catch-up drains faster than the live tail: no wait.
                }
                Ok(Iteration::Drained) => {
                    consecutive_errors = 0;
                    Self::set_state(&self.status, HandlerState::Live);
                    self.wait(&mut shutdown, self.config.interval).await;
                }
                Ok(Iteration::Skipped) => {
                    consecutive_errors = 0;
                    self.wait(&mut shutdown, self.config.interval).await;
                }
                Err(error) => {
                    consecutive_errors += 1;
                    tracing::error!(
                        projection = %self.config.name,
                        consecutive_errors,
                        error = ?error,
                        "projection iteration failed"
                    );
                    if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                        tracing::error!(
                            projection = %self.config.name,
                            "too many consecutive failures, stopping handler"
                        );
                        break;
                    }
                    self.wait(&mut shutdown, self.config.retry_delay).await;
                }
            }
        }

        Self::set_state(&self.status, HandlerState::Stopped);
    }

    async fn wait(&self, shutdown: &mut watch::Receiver<bool>, duration: std::time::Duration) {
        tokio::select! {
            _ = shutdown.changed() => {}
            _ = tokio::time::sleep(duration) => {}
        }
    }

    /// One tick: take the advisory lock, read the cursor, reduce a batch
    /// event by event under savepoints, persist the cursor, commit.
    async fn iterate(&self) -> Result<Iteration> {
        let instance = self.config.instance_id.clone().unwrap_or_default();
        let mut tx: Transaction<'_, Postgres> = self.pool.begin().await?;

        if self.config.enable_locking {
            let key = db::advisory_lock_key(&self.config.name, &instance);
            if !db::try_advisory_xact_lock(&mut *tx, key).await? {
                tx.commit().await?;
                return Ok(Iteration::Skipped);
            }
        }

        let cursor = state::fetch_position(&mut *tx, &self.config.name, &instance).await?;
        let events = self.fetch_batch(&mut tx, cursor).await?;

        let full_batch = events.len() as i64 == self.config.batch_size;
        let mut new_position = cursor;

        for event in &events {
            let mut savepoint = tx.begin().await?;
            match self.projection.reduce(event, &mut savepoint).await {
                Ok(()) => {
                    savepoint.commit().await?;
                }
                Err(error) => {
                    savepoint.rollback().await?;
                    tracing::warn!(
                        projection = %self.config.name,
                        position = %event.position,
                        event_type = %event.event_type,
                        error = ?error,
                        "reducer failed, quarantining event"
                    );
                    state::record_failure(&mut *tx, &self.config.name, event, &error.to_string())
                        .await?;
                }
            }
            // The cursor advances past quarantined events; they are only
            // revisited by operator action.
            new_position = event.position;
        }

        // A drained batch means no further matching events exist, so the
        // cursor can jump to the log head: filtered projections report
        // no lag for events they do not consume. Appends serialize on
        // the position lock, so everything at or below the head is
        // visible.
        if !full_batch {
            let head: Option<(i64, i32)> = sqlx::query_as(statements::SELECT_HEAD_POSITION)
                .fetch_optional(&mut *tx)
                .await?;
            if let Some((position, in_position_order)) = head {
                let head = Position::new(position, in_position_order);
                if head > new_position {
                    new_position = head;
                }
            }
        }

        if new_position > cursor {
            state::persist_position(&mut *tx, &self.config.name, &instance, new_position).await?;
        }
        tx.commit().await?;

        Ok(if full_batch {
            Iteration::Progress
        } else {
            Iteration::Drained
        })
    }

    async fn fetch_batch(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        cursor: Position,
    ) -> Result<Vec<StoreEvent>> {
        let mut sql = String::from(
            "SELECT * FROM events WHERE (position, in_position_order) > ($1, $2)",
        );
        let mut placeholder = 3;

        if self.config.instance_id.is_some() {
            sql.push_str(&format!(" AND instance_id = ${placeholder}"));
            placeholder += 1;
        }
        if !self.config.aggregate_types.is_empty() {
            sql.push_str(&format!(" AND aggregate_type = ANY(${placeholder})"));
            placeholder += 1;
        }
        if !self.config.event_types.is_empty() {
            sql.push_str(&format!(" AND event_type = ANY(${placeholder})"));
            placeholder += 1;
        }
        sql.push_str(&format!(
            " ORDER BY position ASC, in_position_order ASC LIMIT ${placeholder}"
        ));

        let mut query = sqlx::query_as::<_, DbEvent>(&sql)
            .bind(cursor.position)
            .bind(cursor.in_position_order);
        if let Some(instance) = &self.config.instance_id {
            query = query.bind(instance.clone());
        }
        if !self.config.aggregate_types.is_empty() {
            query = query.bind(self.config.aggregate_types.clone());
        }
        if !self.config.event_types.is_empty() {
            query = query.bind(self.config.event_types.clone());
        }
        query = query.bind(self.config.batch_size);

        let rows = query.fetch_all(&mut **tx).await?;
        Ok(rows.into_iter().map(StoreEvent::from).collect())
    }
}

impl std::fmt::Debug for ProjectionHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectionHandler")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish()
    }
}

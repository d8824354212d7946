//! Registry and lifecycle owner of all projection handlers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sqlx::PgPool;

use crate::config::ProjectionConfig;
use crate::error::{Error, Result};
use crate::projection::{state, FailedEvent, Projection, ProjectionHandler};
use crate::sql::statements;
use crate::types::Position;

/// How often [`ProjectionEngine::wait_for_projection`] re-reads the
/// cursor while blocking.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Owns one [`ProjectionHandler`] per registered projection, plus the
/// cross-cutting views on cursors, lag and quarantined events.
pub struct ProjectionEngine {
    pool: PgPool,
    handlers: Mutex<HashMap<String, Arc<ProjectionHandler>>>,
}

impl ProjectionEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            handlers: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Registers a projection under its configured name.
    pub fn register(
        &self,
        config: ProjectionConfig,
        projection: impl Projection + 'static,
    ) -> Result<Arc<ProjectionHandler>> {
        let mut handlers = self
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if handlers.contains_key(&config.name) {
            return Err(Error::validation(
                "projection",
                format!("projection `{}` is already registered", config.name),
            ));
        }

        let handler = Arc::new(ProjectionHandler::new(
            self.pool.clone(),
            config.clone(),
            Arc::new(projection),
        ));
        handlers.insert(config.name, Arc::clone(&handler));
        Ok(handler)
    }

    pub fn handler(&self, name: &str) -> Option<Arc<ProjectionHandler>> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    fn all_handlers(&self) -> Vec<Arc<ProjectionHandler>> {
        self.handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    pub async fn start_all(&self) -> Result<()> {
        for handler in self.all_handlers() {
            handler.start().await?;
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        for handler in self.all_handlers() {
            handler.stop().await;
        }
    }

    /// Current cursor of a projection; genesis when it has not run yet.
    pub async fn projection_position(&self, name: &str, instance_id: &str) -> Result<Position> {
        let mut connection = self.pool.acquire().await?;
        state::fetch_position(&mut connection, name, instance_id).await
    }

    /// Blocks until the projection's cursor reaches `target` or the
    /// timeout fires. Returns whether the target was reached.
    ///
    /// This is the read-after-write primitive: capture the position of a
    /// pushed event, then wait here instead of sleeping.
    pub async fn wait_for_projection(
        &self,
        name: &str,
        instance_id: &str,
        target: Position,
        timeout: Duration,
    ) -> Result<bool> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = self.projection_position(name, instance_id).await?;
            if current >= target {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(WAIT_POLL_INTERVAL).await;
        }
    }

    /// Highest position in the event log; 0 when the log is empty.
    pub async fn log_head(&self) -> Result<i64> {
        Ok(sqlx::query_scalar(statements::SELECT_MAX_POSITION)
            .fetch_one(&self.pool)
            .await?)
    }

    /// A projection is healthy when its lag behind the log head is at
    /// most `max_lag` positions.
    pub async fn is_healthy(&self, name: &str, instance_id: &str, max_lag: i64) -> Result<bool> {
        let head = self.log_head().await?;
        let cursor = self.projection_position(name, instance_id).await?;
        Ok(head - cursor.position <= max_lag)
    }

    /// Quarantined events of one projection, oldest first.
    pub async fn failed_events(&self, name: &str) -> Result<Vec<FailedEvent>> {
        state::failed_events(&self.pool, name).await
    }
}

impl std::fmt::Debug for ProjectionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .handlers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        f.debug_struct("ProjectionEngine").field("projections", &names).finish()
    }
}

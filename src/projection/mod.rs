//! The projection engine: background workers tailing the event log and
//! folding events into read-model tables.
//!
//! A projection is a pair of data configuration
//! ([`crate::config::ProjectionConfig`]) and an implementation of the
//! [`Projection`] trait. The [`ProjectionHandler`] drives one projection
//! through its lifecycle; the [`ProjectionEngine`] owns the handlers,
//! the position cursors and the failed-event quarantine.
//!
//! Reducers must be idempotent: events can be re-applied across restarts
//! and rebuilds, so every write is an upsert or guarded update.

mod engine;
mod handler;
pub mod state;

pub mod apps;
pub mod grants;
pub mod members;
pub mod orgs;
pub mod projects;
pub mod users;

pub use engine::ProjectionEngine;
pub use handler::{HandlerState, ProjectionHandler};
pub use state::FailedEvent;

use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::error::Result;
use crate::event::StoreEvent;

/// A deterministic fold of events into a fixed set of read-model tables.
///
/// Only one projection may write a given table. `reduce` runs inside a
/// savepoint of the handler's iteration transaction: a returned error
/// rolls back only this event's writes and quarantines the event.
#[async_trait]
pub trait Projection: Send + Sync {
    /// Idempotent DDL for the owned tables and indices.
    async fn init(&self, pool: &PgPool) -> Result<()>;

    /// Applies a single event to the owned tables.
    async fn reduce(&self, event: &StoreEvent, tx: &mut Transaction<'_, Postgres>) -> Result<()>;

    /// Clears the owned tables for a rebuild.
    async fn reset(&self, tx: &mut Transaction<'_, Postgres>) -> Result<()>;
}

//! Event-sourced identity and access management core.
//!
//! The crate is organized around three tightly coupled subsystems:
//!
//! 1. [`store`] — an append-only, strictly ordered event log with
//!    optimistic concurrency control on aggregates.
//! 2. [`projection`] — background workers tailing the log, transactionally
//!    updating read-model tables, coordinating across replicas via
//!    advisory locks and quarantining poison events.
//! 3. [`permission`] — deterministic aggregation of effective permissions
//!    from memberships, user grants and cross-org project grants.
//!
//! Around those sit the [`command`] layer (validated state transitions
//! emitting events), the typed read-model [`query`] APIs, and the
//! [`session`], [`token`] and [`auth`] services.
//!
//! Transport handlers, wire-format (de)serialization and notification
//! delivery are external collaborators: this crate only exposes the
//! interfaces they consume.

pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod id;
pub mod kv;
pub mod permission;
pub mod projection;
pub mod query;
pub mod session;
pub mod sql;
pub mod store;
pub mod token;
pub mod types;

pub use auth::AuthProvider;
pub use command::{CommandContext, Commands};
pub use config::{
    DatabaseConfig, EventStoreConfig, PasswordPolicy, ProjectionConfig, SessionConfig, TokenConfig,
};
pub use error::Error;
pub use event::{EventCommand, EventPayload, StoreEvent};
pub use id::IdGenerator;
pub use kv::{KvStore, MemoryKvStore, PgKvStore};
pub use permission::PermissionEngine;
pub use projection::{Projection, ProjectionEngine, ProjectionHandler};
pub use session::SessionService;
pub use store::memory::MemoryEventStore;
pub use store::postgres::PgEventStore;
pub use store::{EventFilter, EventStore};
pub use token::TokenService;
pub use types::{AggregateKind, Position};

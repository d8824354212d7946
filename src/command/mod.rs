//! The command layer: validated state transitions emitting events.
//!
//! Every command takes a [`CommandContext`] first, validates its inputs,
//! checks preconditions against the event log, loads the target
//! aggregate's history when a transition must be validated, appends via
//! the concurrency-checked push, and returns a domain result — never raw
//! events. Read-after-write is the caller's concern: capture the
//! returned [`ObjectDetails::position`] and wait on the projection
//! engine.

mod app;
mod idp;
mod org;
mod project;
mod saml;
mod user;

pub use app::*;
pub use idp::*;
pub use org::*;
pub use project::*;
pub use saml::*;
pub use user::*;

use std::sync::Arc;

use crate::config::PasswordPolicy;
use crate::error::{Error, Result};
use crate::event::{EventCommand, EventPayload, StoreEvent};
use crate::id::IdGenerator;
use crate::store::EventStore;
use crate::types::{AggregateKind, Position};

/// The caller's identity and tenancy scope.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandContext {
    pub instance_id: String,
    pub org_id: Option<String>,
    pub user_id: Option<String>,
}

impl CommandContext {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            org_id: None,
            user_id: None,
        }
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = Some(org_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub(crate) fn editor(&self) -> String {
        self.user_id.clone().unwrap_or_else(|| "system".to_owned())
    }

    /// The org the caller acts for, falling back to the instance itself
    /// for instance-level objects.
    pub(crate) fn resource_owner(&self) -> String {
        self.org_id.clone().unwrap_or_else(|| self.instance_id.clone())
    }

    pub(crate) fn require_instance(&self) -> Result<()> {
        if self.instance_id.is_empty() {
            return Err(Error::validation("instance_id", "must not be empty"));
        }
        Ok(())
    }
}

/// Where a mutated object ended up: its id, the aggregate version after
/// the write, and the log position to wait on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectDetails {
    pub id: String,
    pub version: i64,
    pub position: Position,
}

impl ObjectDetails {
    pub(crate) fn from_events(events: &[StoreEvent]) -> Self {
        // Push always returns at least one event.
        let last = &events[events.len() - 1];
        Self {
            id: last.aggregate_id.clone(),
            version: last.aggregate_version,
            position: last.position,
        }
    }
}

/// The wired command service.
pub struct Commands {
    store: Arc<dyn EventStore>,
    ids: Arc<IdGenerator>,
    password_policy: PasswordPolicy,
}

impl Commands {
    pub fn new(store: Arc<dyn EventStore>, ids: Arc<IdGenerator>) -> Self {
        Self {
            store,
            ids,
            password_policy: PasswordPolicy::default(),
        }
    }

    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub(crate) fn next_id(&self) -> String {
        self.ids.next_id_string()
    }

    pub(crate) fn password_policy(&self) -> &PasswordPolicy {
        &self.password_policy
    }

    /// Builds one event command in the caller's scope.
    pub(crate) fn command(
        &self,
        ctx: &CommandContext,
        aggregate_id: &str,
        resource_owner: &str,
        payload: EventPayload,
    ) -> EventCommand {
        EventCommand::new(
            aggregate_id,
            payload,
            ctx.editor(),
            resource_owner,
            ctx.instance_id.clone(),
        )
    }

    /// Loads an aggregate's history, or fails with `NotFound`.
    pub(crate) async fn require_history(
        &self,
        ctx: &CommandContext,
        kind: AggregateKind,
        aggregate_id: &str,
    ) -> Result<crate::event::AggregateHistory> {
        self.store
            .aggregate(&ctx.instance_id, &kind, aggregate_id, None)
            .await?
            .ok_or_else(|| Error::NotFound(format!("{kind} {aggregate_id}")))
    }
}

/// Field validation helpers shared by the command modules.
pub(crate) fn require(value: &str, field: &'static str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    Ok(())
}

pub(crate) fn require_email(value: &str) -> Result<()> {
    require(value, "email")?;
    let well_formed = value.split_once('@').map_or(false, |(local, domain)| {
        !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
    });
    if !well_formed {
        return Err(Error::validation("email", "must be a valid email address"));
    }
    Ok(())
}

/// SHA-256 digest in hex; how secrets and verification codes are stored
/// inside event payloads.
pub(crate) fn digest(value: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}

/// A random URL-safe secret of `bytes` entropy, hex-encoded.
pub(crate) fn random_secret(bytes: usize) -> String {
    use rand::RngCore;
    let mut buffer = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buffer);
    hex::encode(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_validation() {
        assert!(require_email("alice@acme.test").is_ok());
        assert!(require_email("alice").is_err());
        assert!(require_email("@acme.test").is_err());
        assert!(require_email("alice@nodot").is_err());
        assert!(require_email("").is_err());
    }

    #[test]
    fn digests_are_stable_and_hex() {
        let a = digest("secret");
        assert_eq!(a, digest("secret"));
        assert_eq!(a.len(), 64);
        assert!(a.bytes().all(|b| b.is_ascii_hexdigit()));
    }
}

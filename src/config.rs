//! Configuration for every component, built with defaults via
//! [`typed_builder::TypedBuilder`].

use std::time::Duration;

use typed_builder::TypedBuilder;

/// Connection settings for the transactional store.
#[derive(Debug, Clone, TypedBuilder)]
pub struct DatabaseConfig {
    #[builder(setter(into))]
    pub url: String,
    #[builder(default = 10)]
    pub max_connections: u32,
    #[builder(default = Duration::from_secs(5))]
    pub acquire_timeout: Duration,
}

/// Eventstore tuning knobs.
#[derive(Debug, Clone, TypedBuilder)]
pub struct EventStoreConfig {
    /// Tenant scope applied when commands omit an explicit instance.
    #[builder(default, setter(into, strip_option))]
    pub instance_id: Option<String>,
    /// Largest batch accepted by a single push; larger batches are rejected.
    #[builder(default = 100)]
    pub max_push_batch_size: usize,
    #[builder(default = Duration::from_secs(30))]
    pub push_timeout: Duration,
    /// When set, committed events are forwarded to broadcast subscribers.
    #[builder(default = false)]
    pub enable_subscriptions: bool,
}

impl Default for EventStoreConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Session service tuning.
#[derive(Debug, Clone, TypedBuilder)]
pub struct SessionConfig {
    #[builder(default = Duration::from_secs(60 * 60))]
    pub session_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Token service tuning.
#[derive(Debug, Clone, TypedBuilder)]
pub struct TokenConfig {
    #[builder(setter(into))]
    pub secret: String,
    #[builder(default = Duration::from_secs(15 * 60))]
    pub access_ttl: Duration,
    #[builder(default = Duration::from_secs(7 * 24 * 60 * 60))]
    pub refresh_ttl: Duration,
    #[builder(default = "stronghold".to_owned(), setter(into))]
    pub issuer: String,
    #[builder(default = "stronghold-api".to_owned(), setter(into))]
    pub audience: String,
}

/// Password complexity policy applied by the auth provider.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder, serde::Serialize, serde::Deserialize)]
pub struct PasswordPolicy {
    #[builder(default = 8)]
    pub min_length: usize,
    #[builder(default = true)]
    pub require_uppercase: bool,
    #[builder(default = true)]
    pub require_lowercase: bool,
    #[builder(default = true)]
    pub require_number: bool,
    #[builder(default = false)]
    pub require_symbol: bool,
    /// Maximum password age in days; `None` disables expiry.
    #[builder(default, setter(strip_option))]
    pub max_age_days: Option<u32>,
    /// How many previous passwords may not be reused; `None` disables it.
    #[builder(default, setter(strip_option))]
    pub prevent_reuse: Option<u32>,
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Per-projection configuration.
#[derive(Debug, Clone, TypedBuilder)]
pub struct ProjectionConfig {
    #[builder(setter(into))]
    pub name: String,
    /// Read-model tables owned by this projection.
    #[builder(default)]
    pub tables: Vec<String>,
    /// Subscription filter: only these event types are reduced. Empty
    /// means every event of the subscribed aggregate types.
    #[builder(default)]
    pub event_types: Vec<String>,
    /// Subscription filter on aggregate types. Empty means all.
    #[builder(default)]
    pub aggregate_types: Vec<String>,
    #[builder(default = 100)]
    pub batch_size: i64,
    /// Live polling interval.
    #[builder(default = Duration::from_secs(1))]
    pub interval: Duration,
    /// Failure count at which a quarantined event is considered permanent.
    #[builder(default = 5)]
    pub max_retries: i32,
    #[builder(default = Duration::from_secs(1))]
    pub retry_delay: Duration,
    /// Advisory-lock coordination across replicas.
    #[builder(default = true)]
    pub enable_locking: bool,
    /// Tenant scope; `None` tails every instance.
    #[builder(default, setter(into, strip_option))]
    pub instance_id: Option<String>,
    /// Reset owned tables and cursor before starting.
    #[builder(default = false)]
    pub rebuild_on_start: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn projection_defaults() {
        let config = ProjectionConfig::builder().name("users").build();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.interval, Duration::from_secs(1));
        assert_eq!(config.max_retries, 5);
        assert!(config.enable_locking);
        assert!(!config.rebuild_on_start);
    }

    #[test]
    fn eventstore_defaults() {
        let config = EventStoreConfig::default();
        assert_eq!(config.max_push_batch_size, 100);
        assert_eq!(config.push_timeout, Duration::from_secs(30));
        assert!(!config.enable_subscriptions);
    }
}

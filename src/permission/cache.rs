//! Process-local permission cache with TTL and key-pattern
//! invalidation. Expiry is checked on read; no background timers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::Permission;

/// Cache key: one caller context.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct CacheKey {
    pub user_id: String,
    pub instance_id: String,
    pub org_id: Option<String>,
    pub project_id: Option<String>,
}

struct CacheEntry {
    permissions: Vec<Permission>,
    expires_at: Instant,
}

pub(super) struct PermissionCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl PermissionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Vec<Permission>> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.permissions.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: CacheKey, permissions: Vec<Permission>) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(
                key,
                CacheEntry {
                    permissions,
                    expires_at: Instant::now() + self.ttl,
                },
            );
    }

    /// Drops every context of one user in one instance. Entries of other
    /// instances stay untouched, so nothing leaks across tenants.
    pub fn clear_user(&self, user_id: &str, instance_id: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retain(|key, _| !(key.user_id == user_id && key.instance_id == instance_id));
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

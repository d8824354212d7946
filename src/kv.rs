//! Key-value storage backing sessions, refresh-token bookkeeping, token
//! revocation and MFA continuations.
//!
//! Two implementations: [`MemoryKvStore`] (process-local, for tests and
//! single-node setups) and [`PgKvStore`] (one `kv` table in the shared
//! database, visible to every replica). Both enforce TTL on read, so
//! [`KvStore::cleanup_expired`] is an optional sweep rather than a
//! correctness requirement.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use crate::error::Result;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// The value at `key`, if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Stores `value` under `key`, replacing any previous value. A TTL
    /// of `None` keeps the entry until deleted.
    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Atomically removes and returns the value at `key`, if present
    /// and not expired. Single-use tokens spend through this: under
    /// concurrent callers, exactly one `take` observes the value.
    async fn take(&self, key: &str) -> Result<Option<Value>>;

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Best-effort sweep of expired entries; returns how many were
    /// dropped.
    async fn cleanup_expired(&self) -> Result<u64>;
}

/// Process-local store behind one mutex.
#[derive(Debug, Default)]
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, (Value, Option<DateTime<Utc>>)>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn expired(expires_at: &Option<DateTime<Utc>>) -> bool {
        expires_at.map_or(false, |at| at <= Utc::now())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some((_, expires_at)) = entries.get(key) {
            if Self::expired(expires_at) {
                entries.remove(key);
                return Ok(None);
            }
        }
        Ok(entries.get(key).map(|(value, _)| value.clone()))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| Utc::now() + ttl)
        });
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_owned(), (value, expires_at));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Value>> {
        // One locked remove: concurrent takers cannot both see the value.
        let removed = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(key);
        Ok(match removed {
            Some((value, expires_at)) if !Self::expired(&expires_at) => Some(value),
            _ => None,
        })
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let mut entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = entries.len();
        entries.retain(|_, (_, expires_at)| !Self::expired(expires_at));
        Ok((before - entries.len()) as u64)
    }
}

/// Replica-shared store on the `kv` table.
#[derive(Debug, Clone)]
pub struct PgKvStore {
    pool: PgPool,
}

impl PgKvStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KvStore for PgKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let row: Option<(Value,)> = sqlx::query_as(
            "SELECT value FROM kv
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > current_timestamp)",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.and_then(|ttl| {
            chrono::Duration::from_std(ttl)
                .ok()
                .map(|ttl| Utc::now() + ttl)
        });
        sqlx::query(
            "INSERT INTO kv (key, value, expires_at) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET value = $2, expires_at = $3",
        )
        .bind(key)
        .bind(sqlx::types::Json(value))
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<Value>> {
        // DELETE .. RETURNING: the row lock hands the value to exactly
        // one concurrent taker.
        let row: Option<(Value,)> = sqlx::query_as(
            "DELETE FROM kv
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > current_timestamp)
             RETURNING value",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(value,)| value))
    }

    async fn cleanup_expired(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM kv WHERE expires_at <= current_timestamp")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_round_trips() {
        let store = MemoryKvStore::new();
        store
            .set("a", serde_json::json!({"n": 1}), None)
            .await
            .unwrap();
        assert_eq!(store.get("a").await.unwrap(), Some(serde_json::json!({"n": 1})));
        assert!(store.exists("a").await.unwrap());

        store.delete("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn memory_store_expires_entries() {
        let store = MemoryKvStore::new();
        store
            .set("gone", Value::Bool(true), Some(Duration::from_millis(10)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get("gone").await.unwrap(), None);
        assert_eq!(store.cleanup_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn take_yields_a_value_exactly_once() {
        let store = MemoryKvStore::new();
        store.set("spend", Value::Bool(true), None).await.unwrap();

        assert_eq!(store.take("spend").await.unwrap(), Some(Value::Bool(true)));
        assert_eq!(store.take("spend").await.unwrap(), None);
        assert!(!store.exists("spend").await.unwrap());
    }

    #[tokio::test]
    async fn take_ignores_expired_entries() {
        let store = MemoryKvStore::new();
        store
            .set("gone", Value::Bool(true), Some(Duration::from_millis(5)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.take("gone").await.unwrap(), None);
    }

    #[tokio::test]
    async fn cleanup_counts_swept_entries() {
        let store = MemoryKvStore::new();
        store
            .set("gone", Value::Null, Some(Duration::from_millis(5)))
            .await
            .unwrap();
        store.set("kept", Value::Null, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.cleanup_expired().await.unwrap(), 1);
        assert!(store.exists("kept").await.unwrap());
    }
}

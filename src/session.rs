//! Opaque sessions with TTL over a [`KvStore`].
//!
//! Keys: `session:{id}` for the session itself, `user_sessions:{user}`
//! for the per-user secondary index. The store TTL equals the session
//! TTL, so an expired session disappears on read even before the sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::kv::KvStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub user_id: String,
    pub instance_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

pub struct SessionService {
    store: Arc<dyn KvStore>,
    config: SessionConfig,
}

impl SessionService {
    pub fn new(store: Arc<dyn KvStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    fn session_key(id: &str) -> String {
        format!("session:{id}")
    }

    fn index_key(user_id: &str) -> String {
        format!("user_sessions:{user_id}")
    }

    fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.config.session_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(1))
    }

    pub async fn create(
        &self,
        user_id: &str,
        instance_id: &str,
        metadata: Value,
    ) -> Result<Session> {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_owned(),
            instance_id: instance_id.to_owned(),
            created_at: now,
            expires_at: now + self.ttl_chrono(),
            last_activity_at: now,
            metadata,
        };

        self.store
            .set(
                &Self::session_key(&session.id),
                serde_json::to_value(&session)?,
                Some(self.config.session_ttl),
            )
            .await?;
        self.index_add(user_id, &session.id).await?;

        Ok(session)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Session>> {
        let value = self.store.get(&Self::session_key(id)).await?;
        let session: Option<Session> = value
            .map(serde_json::from_value)
            .transpose()?;
        // Guard against stores that do not enforce TTL themselves.
        Ok(session.filter(|session| session.expires_at > Utc::now()))
    }

    /// Bumps `last_activity_at` and pushes the expiry out by one TTL.
    /// Fails with [`Error::SessionExpired`] when the session is gone.
    pub async fn update_activity(&self, id: &str) -> Result<Session> {
        let mut session = self.get(id).await?.ok_or(Error::SessionExpired)?;
        let now = Utc::now();
        session.last_activity_at = now;
        session.expires_at = now + self.ttl_chrono();

        self.store
            .set(
                &Self::session_key(id),
                serde_json::to_value(&session)?,
                Some(self.config.session_ttl),
            )
            .await?;
        Ok(session)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        if let Some(session) = self.get(id).await? {
            self.index_remove(&session.user_id, id).await?;
        }
        self.store.delete(&Self::session_key(id)).await
    }

    pub async fn delete_all_for_user(&self, user_id: &str) -> Result<u64> {
        let ids = self.session_ids_for_user(user_id).await?;
        let mut deleted = 0;
        for id in &ids {
            self.store.delete(&Self::session_key(id)).await?;
            deleted += 1;
        }
        self.store.delete(&Self::index_key(user_id)).await?;
        Ok(deleted)
    }

    pub async fn is_valid(&self, id: &str) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }

    /// All live session ids of one user.
    pub async fn session_ids_for_user(&self, user_id: &str) -> Result<Vec<String>> {
        let value = self.store.get(&Self::index_key(user_id)).await?;
        Ok(value
            .map(serde_json::from_value::<Vec<String>>)
            .transpose()?
            .unwrap_or_default())
    }

    /// Best-effort sweep; a no-op when the backing store enforces TTL.
    pub async fn cleanup_expired(&self) -> Result<u64> {
        self.store.cleanup_expired().await
    }

    async fn index_add(&self, user_id: &str, session_id: &str) -> Result<()> {
        let mut ids = self.session_ids_for_user(user_id).await?;
        if !ids.iter().any(|id| id == session_id) {
            ids.push(session_id.to_owned());
        }
        // The index outlives individual sessions; stale ids resolve to
        // nothing on read.
        self.store
            .set(
                &Self::index_key(user_id),
                serde_json::to_value(&ids)?,
                Some(self.config.session_ttl.saturating_mul(2)),
            )
            .await
    }

    async fn index_remove(&self, user_id: &str, session_id: &str) -> Result<()> {
        let mut ids = self.session_ids_for_user(user_id).await?;
        ids.retain(|id| id != session_id);
        self.store
            .set(
                &Self::index_key(user_id),
                serde_json::to_value(&ids)?,
                Some(self.config.session_ttl.saturating_mul(2)),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::kv::MemoryKvStore;

    fn service(ttl: Duration) -> SessionService {
        SessionService::new(
            Arc::new(MemoryKvStore::new()),
            SessionConfig::builder().session_ttl(ttl).build(),
        )
    }

    #[tokio::test]
    async fn create_get_and_validity() {
        let sessions = service(Duration::from_secs(60));
        let session = sessions
            .create("u1", "inst-1", serde_json::json!({"ip": "10.0.0.1"}))
            .await
            .unwrap();

        let loaded = sessions.get(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded, session);
        assert!(sessions.is_valid(&session.id).await.unwrap());
        assert_eq!(loaded.last_activity_at, loaded.created_at);
    }

    #[tokio::test]
    async fn expired_sessions_vanish() {
        let sessions = service(Duration::from_millis(10));
        let session = sessions.create("u1", "inst-1", Value::Null).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!sessions.is_valid(&session.id).await.unwrap());
        assert!(matches!(
            sessions.update_activity(&session.id).await,
            Err(Error::SessionExpired)
        ));
    }

    #[tokio::test]
    async fn update_activity_extends_expiry() {
        let sessions = service(Duration::from_secs(60));
        let session = sessions.create("u1", "inst-1", Value::Null).await.unwrap();
        let bumped = sessions.update_activity(&session.id).await.unwrap();
        assert!(bumped.last_activity_at >= session.last_activity_at);
        assert!(bumped.expires_at >= session.expires_at);
    }

    #[tokio::test]
    async fn delete_all_clears_the_user_index() {
        let sessions = service(Duration::from_secs(60));
        let a = sessions.create("u1", "inst-1", Value::Null).await.unwrap();
        let b = sessions.create("u1", "inst-1", Value::Null).await.unwrap();
        let other = sessions.create("u2", "inst-1", Value::Null).await.unwrap();

        assert_eq!(sessions.delete_all_for_user("u1").await.unwrap(), 2);
        assert!(!sessions.is_valid(&a.id).await.unwrap());
        assert!(!sessions.is_valid(&b.id).await.unwrap());
        assert!(sessions.is_valid(&other.id).await.unwrap());
    }
}

//! Pooled connections and the advisory-lock primitive.

use sqlx::postgres::PgPoolOptions;
use sqlx::{PgConnection, PgPool};

use crate::config::DatabaseConfig;

/// Builds a connection pool from [`DatabaseConfig`].
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(config.url.as_str())
        .await
}

/// Cheap connectivity probe.
pub async fn health(pool: &PgPool) -> bool {
    sqlx::query("SELECT 1").execute(pool).await.is_ok()
}

/// Attempts to take a transaction-scoped advisory lock.
///
/// Returns `false` when another session holds the lock. The lock is
/// released automatically on commit or rollback, so there is no unlock
/// counterpart.
pub async fn try_advisory_xact_lock(
    connection: &mut PgConnection,
    key: i64,
) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar("SELECT pg_try_advisory_xact_lock($1)")
        .bind(key)
        .fetch_one(connection)
        .await
}

/// Derives a stable 64-bit advisory-lock key from a projection name and
/// instance scope. SHA-256 keeps the derivation identical across
/// replicas regardless of process or compiler.
pub fn advisory_lock_key(name: &str, instance_id: &str) -> i64 {
    use sha2::{Digest, Sha256};

    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update([0u8]);
    hasher.update(instance_id.as_bytes());
    let digest = hasher.finalize();

    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_keys_are_stable_and_scoped() {
        let a = advisory_lock_key("users", "inst-1");
        assert_eq!(a, advisory_lock_key("users", "inst-1"));
        assert_ne!(a, advisory_lock_key("users", "inst-2"));
        assert_ne!(a, advisory_lock_key("orgs", "inst-1"));
    }

    #[test]
    fn lock_key_separator_prevents_concatenation_clashes() {
        assert_ne!(advisory_lock_key("ab", "c"), advisory_lock_key("a", "bc"));
    }
}

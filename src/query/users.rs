//! Queries over `projections.users` and `projections.machine_keys`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::query::filter::Filter;
use crate::types::{Pagination, UserState};

/// Projected user.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub instance_id: String,
    pub org_id: String,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: Option<String>,
    pub preferred_language: Option<String>,
    pub email: String,
    pub email_verified: bool,
    pub phone: Option<String>,
    pub state: UserState,
    pub password_hash: Option<String>,
    pub otp_secret: Option<String>,
    pub otp_verified: bool,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    instance_id: String,
    org_id: String,
    username: String,
    first_name: String,
    last_name: String,
    display_name: Option<String>,
    preferred_language: Option<String>,
    email: String,
    email_verified: bool,
    phone: Option<String>,
    state: String,
    password_hash: Option<String>,
    otp_secret: Option<String>,
    otp_verified: bool,
    sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            instance_id: row.instance_id,
            org_id: row.org_id,
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            display_name: row.display_name,
            preferred_language: row.preferred_language,
            email: row.email,
            email_verified: row.email_verified,
            phone: row.phone,
            state: UserState::parse(&row.state),
            password_hash: row.password_hash,
            otp_secret: row.otp_secret,
            otp_verified: row.otp_verified,
            sequence: row.sequence,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A machine user's registered public key.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct MachineKey {
    pub instance_id: String,
    pub user_id: String,
    pub key_id: String,
    pub key_type: String,
    pub public_key: String,
    pub expiration_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct UserQueries {
    pool: PgPool,
}

impl UserQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_id(&self, instance_id: &str, id: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT * FROM projections.users
             WHERE instance_id = $1 AND id = $2 AND state != 'removed'",
        )
        .bind(instance_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    pub async fn by_username(&self, instance_id: &str, username: &str) -> Result<Option<User>> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT * FROM projections.users
             WHERE instance_id = $1 AND username = $2 AND state != 'removed'",
        )
        .bind(instance_id)
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Searches users with an optional composed filter over the
    /// projection's columns.
    pub async fn search(
        &self,
        instance_id: &str,
        filter: Option<&Filter>,
        page: Pagination,
        include_removed: bool,
    ) -> Result<Vec<User>> {
        let page = page.clamped();
        let mut sql = String::from("SELECT * FROM projections.users WHERE instance_id = $1");
        if !include_removed {
            sql.push_str(" AND state != 'removed'");
        }

        let compiled = filter.map(|filter| filter.compile(2));
        if let Some(compiled) = &compiled {
            sql.push_str(&format!(" AND ({})", compiled.sql));
        }
        let next = compiled.as_ref().map_or(2, |compiled| compiled.next_index);
        sql.push_str(&format!(
            " ORDER BY created_at ASC, id ASC LIMIT ${} OFFSET ${}",
            next,
            next + 1
        ));

        let mut query = sqlx::query_as::<_, UserRow>(&sql).bind(instance_id);
        if let Some(compiled) = &compiled {
            query = compiled.bind_to(query);
        }
        let rows = query
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(User::from).collect())
    }

    pub async fn machine_keys(&self, instance_id: &str, user_id: &str) -> Result<Vec<MachineKey>> {
        Ok(sqlx::query_as::<_, MachineKey>(
            "SELECT * FROM projections.machine_keys
             WHERE instance_id = $1 AND user_id = $2
             ORDER BY created_at ASC",
        )
        .bind(instance_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

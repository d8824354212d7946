//! Queries over `projections.user_grants`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::query::filter::Filter;
use crate::types::{ObjectState, Pagination};

/// A user's role assignment on a project (optionally through a project
/// grant).
#[derive(Debug, Clone, PartialEq)]
pub struct UserGrant {
    pub id: String,
    pub instance_id: String,
    pub user_id: String,
    pub project_id: String,
    pub project_grant_id: Option<String>,
    pub roles: Vec<String>,
    pub state: ObjectState,
    pub resource_owner: String,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct UserGrantRow {
    id: String,
    instance_id: String,
    user_id: String,
    project_id: String,
    project_grant_id: Option<String>,
    roles: Vec<String>,
    state: String,
    resource_owner: String,
    sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<UserGrantRow> for UserGrant {
    fn from(row: UserGrantRow) -> Self {
        Self {
            id: row.id,
            instance_id: row.instance_id,
            user_id: row.user_id,
            project_id: row.project_id,
            project_grant_id: row.project_grant_id,
            roles: row.roles,
            state: ObjectState::parse(&row.state),
            resource_owner: row.resource_owner,
            sequence: row.sequence,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserGrantQueries {
    pool: PgPool,
}

impl UserGrantQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_id(&self, instance_id: &str, id: &str) -> Result<Option<UserGrant>> {
        let row = sqlx::query_as::<_, UserGrantRow>(
            "SELECT * FROM projections.user_grants
             WHERE instance_id = $1 AND id = $2 AND state != 'removed'",
        )
        .bind(instance_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserGrant::from))
    }

    pub async fn for_user(&self, instance_id: &str, user_id: &str) -> Result<Vec<UserGrant>> {
        Ok(sqlx::query_as::<_, UserGrantRow>(
            "SELECT * FROM projections.user_grants
             WHERE instance_id = $1 AND user_id = $2 AND state != 'removed'
             ORDER BY created_at ASC",
        )
        .bind(instance_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(UserGrant::from)
        .collect())
    }

    pub async fn search(
        &self,
        instance_id: &str,
        filter: Option<&Filter>,
        page: Pagination,
        include_removed: bool,
    ) -> Result<Vec<UserGrant>> {
        let page = page.clamped();
        let mut sql = String::from("SELECT * FROM projections.user_grants WHERE instance_id = $1");
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

        let mut query = sqlx::query_as::<_, UserGrantRow>(&sql).bind(instance_id);
        if let Some(compiled) = &compiled {
            query = compiled.bind_to(query);
        }
        let rows = query
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(UserGrant::from).collect())
    }
}

//! Queries over `projections.members`, the four membership scopes in
//! one table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::types::MemberKind;

/// One membership of one user in one scope.
#[derive(Debug, Clone, PartialEq)]
pub struct Membership {
    pub instance_id: String,
    pub kind: MemberKind,
    /// Instance id, org id, project id or project-grant id depending on
    /// the scope.
    pub scope_id: String,
    pub user_id: String,
    pub roles: Vec<String>,
    pub resource_owner: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct MemberRow {
    instance_id: String,
    member_type: String,
    scope_id: String,
    user_id: String,
    roles: Vec<String>,
    resource_owner: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<MemberRow> for Membership {
    fn from(row: MemberRow) -> Self {
        Self {
            instance_id: row.instance_id,
            kind: MemberKind::parse(&row.member_type),
            scope_id: row.scope_id,
            user_id: row.user_id,
            roles: row.roles,
            resource_owner: row.resource_owner,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemberQueries {
    pool: PgPool,
}

impl MemberQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// All members of one scope.
    pub async fn members_of(
        &self,
        instance_id: &str,
        kind: MemberKind,
        scope_id: &str,
    ) -> Result<Vec<Membership>> {
        Ok(sqlx::query_as::<_, MemberRow>(
            "SELECT * FROM projections.members
             WHERE instance_id = $1 AND member_type = $2 AND scope_id = $3
             ORDER BY user_id ASC",
        )
        .bind(instance_id)
        .bind(kind.as_str())
        .bind(scope_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Membership::from)
        .collect())
    }

    /// Every membership of one user across all scopes; the permission
    /// engine's primary source.
    pub async fn memberships_of_user(
        &self,
        instance_id: &str,
        user_id: &str,
    ) -> Result<Vec<Membership>> {
        Ok(sqlx::query_as::<_, MemberRow>(
            "SELECT * FROM projections.members
             WHERE instance_id = $1 AND user_id = $2
             ORDER BY member_type ASC, scope_id ASC",
        )
        .bind(instance_id)
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(Membership::from)
        .collect())
    }

    pub async fn membership(
        &self,
        instance_id: &str,
        kind: MemberKind,
        scope_id: &str,
        user_id: &str,
    ) -> Result<Option<Membership>> {
        let row = sqlx::query_as::<_, MemberRow>(
            "SELECT * FROM projections.members
             WHERE instance_id = $1 AND member_type = $2 AND scope_id = $3 AND user_id = $4",
        )
        .bind(instance_id)
        .bind(kind.as_str())
        .bind(scope_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Membership::from))
    }
}

//! Queries over `projections.projects`, `projections.project_roles` and
//! `projections.project_grants`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::query::filter::Filter;
use crate::types::{ObjectState, Pagination};

/// Projected project.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: String,
    pub instance_id: String,
    pub resource_owner: String,
    pub name: String,
    pub state: ObjectState,
    pub project_role_assertion: bool,
    pub project_role_check: bool,
    pub private_labeling: Option<String>,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ProjectRow {
    id: String,
    instance_id: String,
    resource_owner: String,
    name: String,
    state: String,
    project_role_assertion: bool,
    project_role_check: bool,
    private_labeling: Option<String>,
    sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            instance_id: row.instance_id,
            resource_owner: row.resource_owner,
            name: row.name,
            state: ObjectState::parse(&row.state),
            project_role_assertion: row.project_role_assertion,
            project_role_check: row.project_role_check,
            private_labeling: row.private_labeling,
            sequence: row.sequence,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// A role defined on a project.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ProjectRole {
    pub instance_id: String,
    pub project_id: String,
    pub role_key: String,
    pub display_name: String,
    pub role_group: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Cross-org delegation of a project.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectGrant {
    pub instance_id: String,
    pub grant_id: String,
    pub project_id: String,
    pub granted_org_id: String,
    pub granted_roles: Vec<String>,
    pub state: ObjectState,
    pub resource_owner: String,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ProjectGrantRow {
    instance_id: String,
    grant_id: String,
    project_id: String,
    granted_org_id: String,
    granted_roles: Vec<String>,
    state: String,
    resource_owner: String,
    sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ProjectGrantRow> for ProjectGrant {
    fn from(row: ProjectGrantRow) -> Self {
        Self {
            instance_id: row.instance_id,
            grant_id: row.grant_id,
            project_id: row.project_id,
            granted_org_id: row.granted_org_id,
            granted_roles: row.granted_roles,
            state: ObjectState::parse(&row.state),
            resource_owner: row.resource_owner,
            sequence: row.sequence,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProjectQueries {
    pool: PgPool,
}

impl ProjectQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_id(&self, instance_id: &str, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT * FROM projections.projects
             WHERE instance_id = $1 AND id = $2 AND state != 'removed'",
        )
        .bind(instance_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Project::from))
    }

    pub async fn roles(&self, instance_id: &str, project_id: &str) -> Result<Vec<ProjectRole>> {
        Ok(sqlx::query_as::<_, ProjectRole>(
            "SELECT * FROM projections.project_roles
             WHERE instance_id = $1 AND project_id = $2
             ORDER BY role_key ASC",
        )
        .bind(instance_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn grant_by_id(&self, instance_id: &str, grant_id: &str) -> Result<Option<ProjectGrant>> {
        let row = sqlx::query_as::<_, ProjectGrantRow>(
            "SELECT * FROM projections.project_grants
             WHERE instance_id = $1 AND grant_id = $2 AND state != 'removed'",
        )
        .bind(instance_id)
        .bind(grant_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ProjectGrant::from))
    }

    pub async fn grants_of_project(
        &self,
        instance_id: &str,
        project_id: &str,
    ) -> Result<Vec<ProjectGrant>> {
        Ok(sqlx::query_as::<_, ProjectGrantRow>(
            "SELECT * FROM projections.project_grants
             WHERE instance_id = $1 AND project_id = $2 AND state != 'removed'
             ORDER BY created_at ASC",
        )
        .bind(instance_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ProjectGrant::from)
        .collect())
    }

    /// Grants where the given org is the grantee; the permission
    /// engine's cross-org source.
    pub async fn grants_for_org(
        &self,
        instance_id: &str,
        granted_org_id: &str,
    ) -> Result<Vec<ProjectGrant>> {
        Ok(sqlx::query_as::<_, ProjectGrantRow>(
            "SELECT * FROM projections.project_grants
             WHERE instance_id = $1 AND granted_org_id = $2 AND state != 'removed'
             ORDER BY created_at ASC",
        )
        .bind(instance_id)
        .bind(granted_org_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(ProjectGrant::from)
        .collect())
    }

    pub async fn search(
        &self,
        instance_id: &str,
        filter: Option<&Filter>,
        page: Pagination,
        include_removed: bool,
    ) -> Result<Vec<Project>> {
        let page = page.clamped();
        let mut sql = String::from("SELECT * FROM projections.projects WHERE instance_id = $1");
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

        let mut query = sqlx::query_as::<_, ProjectRow>(&sql).bind(instance_id);
        if let Some(compiled) = &compiled {
            query = compiled.bind_to(query);
        }
        let rows = query
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Project::from).collect())
    }
}

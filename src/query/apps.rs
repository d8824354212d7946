//! Queries over `projections.apps`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::query::filter::Filter;
use crate::types::{AppKind, ObjectState, Pagination};

/// Projected application with its variant-specific configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct App {
    pub id: String,
    pub instance_id: String,
    pub project_id: String,
    pub resource_owner: String,
    pub name: String,
    pub state: ObjectState,
    pub kind: AppKind,
    pub client_id: Option<String>,
    pub client_secret_digest: Option<String>,
    pub redirect_uris: Vec<String>,
    pub post_logout_redirect_uris: Vec<String>,
    pub response_types: Vec<String>,
    pub grant_types: Vec<String>,
    pub app_type: Option<String>,
    pub auth_method: Option<String>,
    pub dev_mode: bool,
    pub entity_id: Option<String>,
    pub acs_url: Option<String>,
    pub certificate: Option<String>,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AppRow {
    id: String,
    instance_id: String,
    project_id: String,
    resource_owner: String,
    name: String,
    state: String,
    kind: String,
    client_id: Option<String>,
    client_secret_digest: Option<String>,
    redirect_uris: Vec<String>,
    post_logout_redirect_uris: Vec<String>,
    response_types: Vec<String>,
    grant_types: Vec<String>,
    app_type: Option<String>,
    auth_method: Option<String>,
    dev_mode: bool,
    entity_id: Option<String>,
    acs_url: Option<String>,
    certificate: Option<String>,
    sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<AppRow> for App {
    fn from(row: AppRow) -> Self {
        Self {
            id: row.id,
            instance_id: row.instance_id,
            project_id: row.project_id,
            resource_owner: row.resource_owner,
            name: row.name,
            state: ObjectState::parse(&row.state),
            kind: AppKind::parse(&row.kind),
            client_id: row.client_id,
            client_secret_digest: row.client_secret_digest,
            redirect_uris: row.redirect_uris,
            post_logout_redirect_uris: row.post_logout_redirect_uris,
            response_types: row.response_types,
            grant_types: row.grant_types,
            app_type: row.app_type,
            auth_method: row.auth_method,
            dev_mode: row.dev_mode,
            entity_id: row.entity_id,
            acs_url: row.acs_url,
            certificate: row.certificate,
            sequence: row.sequence,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppQueries {
    pool: PgPool,
}

impl AppQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_id(&self, instance_id: &str, id: &str) -> Result<Option<App>> {
        let row = sqlx::query_as::<_, AppRow>(
            "SELECT * FROM projections.apps
             WHERE instance_id = $1 AND id = $2 AND state != 'removed'",
        )
        .bind(instance_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(App::from))
    }

    /// OIDC/API client lookup used by token introspection.
    pub async fn by_client_id(&self, instance_id: &str, client_id: &str) -> Result<Option<App>> {
        let row = sqlx::query_as::<_, AppRow>(
            "SELECT * FROM projections.apps
             WHERE instance_id = $1 AND client_id = $2 AND state != 'removed'",
        )
        .bind(instance_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(App::from))
    }

    pub async fn of_project(&self, instance_id: &str, project_id: &str) -> Result<Vec<App>> {
        Ok(sqlx::query_as::<_, AppRow>(
            "SELECT * FROM projections.apps
             WHERE instance_id = $1 AND project_id = $2 AND state != 'removed'
             ORDER BY created_at ASC",
        )
        .bind(instance_id)
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(App::from)
        .collect())
    }

    pub async fn search(
        &self,
        instance_id: &str,
        filter: Option<&Filter>,
        page: Pagination,
        include_removed: bool,
    ) -> Result<Vec<App>> {
        let page = page.clamped();
        let mut sql = String::from("SELECT * FROM projections.apps WHERE instance_id = $1");
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

        let mut query = sqlx::query_as::<_, AppRow>(&sql).bind(instance_id);
        if let Some(compiled) = &compiled {
            query = compiled.bind_to(query);
        }
        let rows = query
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(App::from).collect())
    }
}

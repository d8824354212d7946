//! Queries over `projections.orgs` and `projections.org_domains`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::Result;
use crate::query::filter::Filter;
use crate::types::{ObjectState, Pagination};

/// Projected organization.
#[derive(Debug, Clone, PartialEq)]
pub struct Org {
    pub id: String,
    pub instance_id: String,
    pub name: String,
    pub state: ObjectState,
    pub primary_domain: Option<String>,
    pub sequence: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct OrgRow {
    id: String,
    instance_id: String,
    name: String,
    state: String,
    primary_domain: Option<String>,
    sequence: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<OrgRow> for Org {
    fn from(row: OrgRow) -> Self {
        Self {
            id: row.id,
            instance_id: row.instance_id,
            name: row.name,
            state: ObjectState::parse(&row.state),
            primary_domain: row.primary_domain,
            sequence: row.sequence,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Projected org domain.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct OrgDomain {
    pub instance_id: String,
    pub org_id: String,
    pub domain: String,
    pub is_verified: bool,
    pub is_primary: bool,
    pub validation_type: String,
    pub validation_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct OrgQueries {
    pool: PgPool,
}

impl OrgQueries {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn by_id(&self, instance_id: &str, id: &str) -> Result<Option<Org>> {
        let row = sqlx::query_as::<_, OrgRow>(
            "SELECT * FROM projections.orgs
             WHERE instance_id = $1 AND id = $2 AND state != 'removed'",
        )
        .bind(instance_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Org::from))
    }

    /// Resolves a verified domain to its org, across all orgs of the
    /// instance.
    pub async fn by_domain_global(&self, instance_id: &str, domain: &str) -> Result<Option<Org>> {
        let row = sqlx::query_as::<_, OrgRow>(
            "SELECT o.* FROM projections.orgs o
             JOIN projections.org_domains d
               ON d.instance_id = o.instance_id AND d.org_id = o.id
             WHERE o.instance_id = $1 AND d.domain = $2 AND d.is_verified
               AND o.state != 'removed'",
        )
        .bind(instance_id)
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Org::from))
    }

    pub async fn domains(&self, instance_id: &str, org_id: &str) -> Result<Vec<OrgDomain>> {
        Ok(sqlx::query_as::<_, OrgDomain>(
            "SELECT * FROM projections.org_domains
             WHERE instance_id = $1 AND org_id = $2
             ORDER BY domain ASC",
        )
        .bind(instance_id)
        .bind(org_id)
        .fetch_all(&self.pool)
        .await?)
    }

    pub async fn search(
        &self,
        instance_id: &str,
        filter: Option<&Filter>,
        page: Pagination,
        include_removed: bool,
    ) -> Result<Vec<Org>> {
        let page = page.clamped();
        let mut sql = String::from("SELECT * FROM projections.orgs WHERE instance_id = $1");
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

        let mut query = sqlx::query_as::<_, OrgRow>(&sql).bind(instance_id);
        if let Some(compiled) = &compiled {
            query = compiled.bind_to(query);
        }
        let rows = query
            .bind(page.limit)
            .bind(page.offset)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Org::from).collect())
    }
}

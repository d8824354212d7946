//! Effective-permission aggregation.
//!
//! For a caller context the engine joins three role sources — scope
//! memberships (instance/org/project/project-grant), user grants, and
//! cross-org project grants where the caller's org is the grantee —
//! expands each role through the static mapping, attaches conditions
//! from the source row, and dedupes by `(resource, action)` unioning
//! conditions.
//!
//! For a fixed database snapshot the result is deterministic and does
//! not depend on cache warmth; the cache only short-circuits the reads.

mod cache;
pub mod roles;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::error::Result;
use crate::query::{MemberQueries, ProjectQueries, UserGrantQueries, UserQueries};
use crate::types::MemberKind;

use cache::{CacheKey, PermissionCache};

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// The caller whose effective permissions are aggregated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PermissionContext {
    pub user_id: String,
    pub instance_id: String,
    pub org_id: Option<String>,
    pub project_id: Option<String>,
}

/// One effective permission: a resource/action pair plus the conditions
/// under which it applies. Empty conditions mean unconditional.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permission {
    pub resource: String,
    pub action: String,
    pub conditions: BTreeSet<(String, String)>,
}

impl Permission {
    pub fn new(resource: &str, action: &str) -> Self {
        Self {
            resource: resource.to_owned(),
            action: action.to_owned(),
            conditions: BTreeSet::new(),
        }
    }

    pub fn with_conditions(
        resource: &str,
        action: &str,
        conditions: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            resource: resource.to_owned(),
            action: action.to_owned(),
            conditions: conditions.into_iter().collect(),
        }
    }

    /// Whether this permission satisfies one requirement: equal
    /// resource, equal action (or `manage`, which subsumes any action),
    /// and — for conditional permissions — every required condition
    /// present.
    pub fn matches(&self, requirement: &Requirement) -> bool {
        if self.resource != requirement.resource {
            return false;
        }
        if self.action != requirement.action && self.action != "manage" {
            return false;
        }
        self.conditions.is_empty()
            || requirement
                .conditions
                .iter()
                .all(|condition| self.conditions.contains(condition))
    }
}

/// A permission demanded by a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub resource: String,
    pub action: String,
    pub conditions: Vec<(String, String)>,
}

impl Requirement {
    pub fn new(resource: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            action: action.into(),
            conditions: Vec::new(),
        }
    }

    pub fn condition(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.conditions.push((key.into(), value.into()));
        self
    }
}

/// The verdict of [`PermissionEngine::check_permissions`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionCheck {
    pub has_permission: bool,
    pub matched_permissions: Vec<Permission>,
    pub reason: Option<String>,
}

pub struct PermissionEngine {
    users: UserQueries,
    members: MemberQueries,
    user_grants: UserGrantQueries,
    projects: ProjectQueries,
    cache: Arc<PermissionCache>,
}

impl PermissionEngine {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserQueries::new(pool.clone()),
            members: MemberQueries::new(pool.clone()),
            user_grants: UserGrantQueries::new(pool.clone()),
            projects: ProjectQueries::new(pool),
            cache: Arc::new(PermissionCache::new(CACHE_TTL)),
        }
    }

    /// Effective permissions of the caller, cached per context for five
    /// minutes.
    pub async fn my_permissions(&self, ctx: &PermissionContext) -> Result<Vec<Permission>> {
        let key = CacheKey {
            user_id: ctx.user_id.clone(),
            instance_id: ctx.instance_id.clone(),
            org_id: ctx.org_id.clone(),
            project_id: ctx.project_id.clone(),
        };
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let permissions = self.aggregate(ctx).await?;
        self.cache.insert(key, permissions.clone());
        Ok(permissions)
    }

    /// Checks requirements against the caller's effective permissions.
    /// Requirements without explicit conditions inherit the context's
    /// org/project scope.
    pub async fn check_permissions(
        &self,
        ctx: &PermissionContext,
        required: &[Requirement],
    ) -> Result<PermissionCheck> {
        let permissions = self.my_permissions(ctx).await?;

        let mut matched: Vec<Permission> = Vec::new();
        for requirement in required {
            let requirement = self.scope_requirement(ctx, requirement);
            match permissions
                .iter()
                .find(|permission| permission.matches(&requirement))
            {
                Some(permission) => matched.push(permission.clone()),
                None => {
                    return Ok(PermissionCheck {
                        has_permission: false,
                        matched_permissions: matched,
                        reason: Some(format!(
                            "missing {}:{}",
                            requirement.resource, requirement.action
                        )),
                    });
                }
            }
        }

        Ok(PermissionCheck {
            has_permission: true,
            matched_permissions: matched,
            reason: None,
        })
    }

    /// Drops every cached context of one user in one instance; called by
    /// the command layer after membership or grant writes.
    pub fn clear_cache(&self, user_id: &str, instance_id: &str) {
        self.cache.clear_user(user_id, instance_id);
    }

    fn scope_requirement(&self, ctx: &PermissionContext, requirement: &Requirement) -> Requirement {
        if !requirement.conditions.is_empty() {
            return requirement.clone();
        }
        let mut scoped = requirement.clone();
        if let Some(org_id) = &ctx.org_id {
            scoped.conditions.push(("org".to_owned(), org_id.clone()));
        }
        if let Some(project_id) = &ctx.project_id {
            scoped
                .conditions
                .push(("project".to_owned(), project_id.clone()));
        }
        scoped
    }

    async fn aggregate(&self, ctx: &PermissionContext) -> Result<Vec<Permission>> {
        let mut collected: Vec<Permission> = Vec::new();

        // Source 1: scope memberships.
        let memberships = self
            .members
            .memberships_of_user(&ctx.instance_id, &ctx.user_id)
            .await?;
        for membership in &memberships {
            let conditions: Vec<(String, String)> = match membership.kind {
                MemberKind::Instance => Vec::new(),
                MemberKind::Org => vec![
                    ("org".to_owned(), membership.scope_id.clone()),
                    ("resource_owner".to_owned(), membership.resource_owner.clone()),
                ],
                MemberKind::Project => vec![
                    ("project".to_owned(), membership.scope_id.clone()),
                    ("resource_owner".to_owned(), membership.resource_owner.clone()),
                ],
                MemberKind::ProjectGrant => vec![
                    ("project_grant".to_owned(), membership.scope_id.clone()),
                    ("resource_owner".to_owned(), membership.resource_owner.clone()),
                ],
            };
            for role in &membership.roles {
                for (resource, action) in roles::permissions_for_role(role) {
                    collected.push(Permission::with_conditions(
                        resource,
                        action,
                        conditions.iter().cloned(),
                    ));
                }
            }
        }

        // Source 2: user grants — project-scoped roles, known roles
        // expanded, project-defined role keys passed through.
        let grants = self
            .user_grants
            .for_user(&ctx.instance_id, &ctx.user_id)
            .await?;
        for grant in &grants {
            let base_conditions = vec![
                ("project".to_owned(), grant.project_id.clone()),
                ("resource_owner".to_owned(), grant.resource_owner.clone()),
            ];
            for role in &grant.roles {
                let expanded = roles::permissions_for_role(role);
                if expanded.is_empty() {
                    collected.push(Permission::with_conditions(
                        "project.role",
                        role,
                        base_conditions.iter().cloned(),
                    ));
                } else {
                    for (resource, action) in expanded {
                        collected.push(Permission::with_conditions(
                            resource,
                            action,
                            base_conditions.iter().cloned(),
                        ));
                    }
                }
            }
        }

        // Source 3: cross-org project grants where the caller's org is
        // the grantee.
        let org_id = match &ctx.org_id {
            Some(org_id) => Some(org_id.clone()),
            None => self
                .users
                .by_id(&ctx.instance_id, &ctx.user_id)
                .await?
                .map(|user| user.org_id),
        };
        if let Some(org_id) = org_id {
            let project_grants = self
                .projects
                .grants_for_org(&ctx.instance_id, &org_id)
                .await?;
            for grant in &project_grants {
                let conditions = vec![
                    ("project".to_owned(), grant.project_id.clone()),
                    ("org".to_owned(), grant.granted_org_id.clone()),
                ];
                for role in &grant.granted_roles {
                    let expanded = roles::permissions_for_role(role);
                    if expanded.is_empty() {
                        collected.push(Permission::with_conditions(
                            "project.role",
                            role,
                            conditions.iter().cloned(),
                        ));
                    } else {
                        for (resource, action) in expanded {
                            collected.push(Permission::with_conditions(
                                resource,
                                action,
                                conditions.iter().cloned(),
                            ));
                        }
                    }
                }
            }
        }

        Ok(dedupe(collected))
    }
}

/// Dedupe by `(resource, action)`, unioning conditions of duplicates.
/// An unconditional duplicate wins outright: union with "applies
/// everywhere" is "applies everywhere".
fn dedupe(permissions: Vec<Permission>) -> Vec<Permission> {
    use std::collections::btree_map::Entry;

    // `None` marks an unconditional permission.
    let mut merged: BTreeMap<(String, String), Option<BTreeSet<(String, String)>>> =
        BTreeMap::new();

    for permission in permissions {
        let unconditional = permission.conditions.is_empty();
        match merged.entry((permission.resource, permission.action)) {
            Entry::Vacant(slot) => {
                slot.insert((!unconditional).then_some(permission.conditions));
            }
            Entry::Occupied(mut slot) => {
                if unconditional {
                    *slot.get_mut() = None;
                } else if let Some(conditions) = slot.get_mut() {
                    conditions.extend(permission.conditions);
                }
            }
        }
    }

    merged
        .into_iter()
        .map(|((resource, action), conditions)| Permission {
            resource,
            action,
            conditions: conditions.unwrap_or_default(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirement(resource: &str, action: &str) -> Requirement {
        Requirement::new(resource, action)
    }

    #[test]
    fn manage_subsumes_any_action() {
        let permission = Permission::new("iam.project", "manage");
        assert!(permission.matches(&requirement("iam.project", "read")));
        assert!(permission.matches(&requirement("iam.project", "manage")));
        assert!(!permission.matches(&requirement("iam.org", "read")));
    }

    #[test]
    fn read_does_not_subsume_manage() {
        let permission = Permission::new("iam.project", "read");
        assert!(!permission.matches(&requirement("iam.project", "manage")));
    }

    #[test]
    fn conditional_permission_requires_matching_scope() {
        let permission = Permission::with_conditions(
            "iam.project",
            "manage",
            [("org".to_owned(), "o1".to_owned())],
        );
        assert!(permission.matches(&requirement("iam.project", "manage").condition("org", "o1")));
        assert!(!permission.matches(&requirement("iam.project", "manage").condition("org", "o2")));
    }

    #[test]
    fn unconditional_permission_matches_any_scope() {
        let permission = Permission::new("iam.org", "manage");
        assert!(permission.matches(&requirement("iam.org", "manage").condition("org", "o2")));
    }

    #[test]
    fn dedupe_unions_conditions() {
        let deduped = dedupe(vec![
            Permission::with_conditions(
                "iam.project",
                "read",
                [("project".to_owned(), "p1".to_owned())],
            ),
            Permission::with_conditions(
                "iam.project",
                "read",
                [("project".to_owned(), "p2".to_owned())],
            ),
        ]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].conditions.len(), 2);
    }

    #[test]
    fn dedupe_lets_unconditional_win() {
        let deduped = dedupe(vec![
            Permission::with_conditions(
                "iam.org",
                "manage",
                [("org".to_owned(), "o1".to_owned())],
            ),
            Permission::new("iam.org", "manage"),
        ]);
        assert_eq!(deduped.len(), 1);
        assert!(deduped[0].conditions.is_empty());
    }
}

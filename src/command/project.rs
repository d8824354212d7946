//! Project lifecycle, roles, memberships, cross-org grants and user
//! grants.

use std::collections::{HashMap, HashSet};

use crate::command::{require, CommandContext, Commands, ObjectDetails};
use crate::error::{Error, Result};
use crate::event::{
    EventPayload, MemberAdded, MemberChanged, MemberRemoved, ProjectAdded, ProjectChanged,
    ProjectDeactivated, ProjectGrantAdded, ProjectGrantChanged, ProjectGrantMemberAdded,
    ProjectGrantMemberChanged, ProjectGrantMemberRemoved, ProjectGrantRemoved, ProjectReactivated,
    ProjectRemoved, ProjectRoleAdded, ProjectRoleRemoved, StoreEvent, UserGrantAdded,
    UserGrantChanged, UserGrantRemoved,
};
use crate::types::{AggregateKind, ObjectState};

/// Input of [`Commands::add_project`].
#[derive(Debug, Clone, Default)]
pub struct AddProject {
    pub name: String,
    pub project_role_assertion: bool,
    pub project_role_check: bool,
    pub private_labeling: Option<String>,
}

/// Input of [`Commands::update_project`]; `None` fields stay unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProjectChanges {
    pub name: Option<String>,
    pub project_role_assertion: Option<bool>,
    pub project_role_check: Option<bool>,
    pub private_labeling: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct GrantModel {
    granted_org_id: String,
    roles: Vec<String>,
    members: HashMap<String, Vec<String>>,
    removed: bool,
}

/// Current project state folded from its event history.
#[derive(Debug, Clone)]
pub(crate) struct ProjectWriteModel {
    pub version: i64,
    pub state: ObjectState,
    roles: HashSet<String>,
    members: HashMap<String, Vec<String>>,
    grants: HashMap<String, GrantModel>,
}

impl ProjectWriteModel {
    pub(crate) fn fold(events: &[StoreEvent]) -> Self {
        let mut model = Self {
            version: 0,
            state: ObjectState::Active,
            roles: HashSet::new(),
            members: HashMap::new(),
            grants: HashMap::new(),
        };
        for event in events {
            model.version = event.aggregate_version;
            match &event.payload {
                EventPayload::ProjectDeactivated(_) => model.state = ObjectState::Inactive,
                EventPayload::ProjectReactivated(_) => model.state = ObjectState::Active,
                EventPayload::ProjectRemoved(_) => model.state = ObjectState::Removed,
                EventPayload::ProjectRoleAdded(added) => {
                    model.roles.insert(added.role_key.clone());
                }
                EventPayload::ProjectRoleRemoved(removed) => {
                    model.roles.remove(&removed.role_key);
                }
                EventPayload::ProjectMemberAdded(MemberAdded { user_id, roles })
                | EventPayload::ProjectMemberChanged(MemberChanged { user_id, roles }) => {
                    model.members.insert(user_id.clone(), roles.clone());
                }
                EventPayload::ProjectMemberRemoved(MemberRemoved { user_id }) => {
                    model.members.remove(user_id);
                }
                EventPayload::ProjectGrantAdded(added) => {
                    model.grants.insert(
                        added.grant_id.clone(),
                        GrantModel {
                            granted_org_id: added.granted_org_id.clone(),
                            roles: added.role_keys.clone(),
                            members: HashMap::new(),
                            removed: false,
                        },
                    );
                }
                EventPayload::ProjectGrantChanged(changed) => {
                    if let Some(grant) = model.grants.get_mut(&changed.grant_id) {
                        grant.roles = changed.role_keys.clone();
                    }
                }
                EventPayload::ProjectGrantRemoved(removed) => {
                    if let Some(grant) = model.grants.get_mut(&removed.grant_id) {
                        grant.removed = true;
                    }
                }
                EventPayload::ProjectGrantMemberAdded(added) => {
                    if let Some(grant) = model.grants.get_mut(&added.grant_id) {
                        grant.members.insert(added.user_id.clone(), added.roles.clone());
                    }
                }
                EventPayload::ProjectGrantMemberChanged(changed) => {
                    if let Some(grant) = model.grants.get_mut(&changed.grant_id) {
                        grant
                            .members
                            .insert(changed.user_id.clone(), changed.roles.clone());
                    }
                }
                EventPayload::ProjectGrantMemberRemoved(removed) => {
                    if let Some(grant) = model.grants.get_mut(&removed.grant_id) {
                        grant.members.remove(&removed.user_id);
                    }
                }
                _ => {}
            }
        }
        model
    }

    fn live_grant(&self, grant_id: &str) -> Option<&GrantModel> {
        self.grants.get(grant_id).filter(|grant| !grant.removed)
    }

    fn has_roles(&self, keys: &[String]) -> bool {
        keys.iter().all(|key| self.roles.contains(key))
    }
}

impl Commands {
    async fn load_project(&self, ctx: &CommandContext, project_id: &str) -> Result<ProjectWriteModel> {
        let history = self
            .require_history(ctx, AggregateKind::Project, project_id)
            .await?;
        let model = ProjectWriteModel::fold(&history.events);
        if model.state == ObjectState::Removed {
            return Err(Error::NotFound(format!("project {project_id}")));
        }
        Ok(model)
    }

    pub async fn add_project(
        &self,
        ctx: &CommandContext,
        input: AddProject,
    ) -> Result<(String, ObjectDetails)> {
        ctx.require_instance()?;
        require(&input.name, "name")?;

        let project_id = self.next_id();
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    &project_id,
                    &ctx.resource_owner(),
                    EventPayload::ProjectAdded(ProjectAdded {
                        name: input.name,
                        project_role_assertion: input.project_role_assertion,
                        project_role_check: input.project_role_check,
                        private_labeling: input.private_labeling,
                    }),
                )],
                0,
            )
            .await?;
        Ok((project_id, ObjectDetails::from_events(&events)))
    }

    pub async fn update_project(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        changes: ProjectChanges,
    ) -> Result<ObjectDetails> {
        if changes.name.is_none()
            && changes.project_role_assertion.is_none()
            && changes.project_role_check.is_none()
            && changes.private_labeling.is_none()
        {
            return Err(Error::validation("project", "nothing to change"));
        }
        let model = self.load_project(ctx, project_id).await?;

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectChanged(ProjectChanged {
                name: changes.name,
                project_role_assertion: changes.project_role_assertion,
                project_role_check: changes.project_role_check,
                private_labeling: changes.private_labeling,
            }),
        )
        .await
    }

    pub async fn deactivate_project(
        &self,
        ctx: &CommandContext,
        project_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_project(ctx, project_id).await?;
        if model.state != ObjectState::Active {
            return Err(Error::validation("state", "only active projects can be deactivated"));
        }
        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectDeactivated(ProjectDeactivated {}),
        )
        .await
    }

    pub async fn reactivate_project(
        &self,
        ctx: &CommandContext,
        project_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_project(ctx, project_id).await?;
        if model.state != ObjectState::Inactive {
            return Err(Error::validation("state", "only inactive projects can be reactivated"));
        }
        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectReactivated(ProjectReactivated {}),
        )
        .await
    }

    pub async fn remove_project(
        &self,
        ctx: &CommandContext,
        project_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_project(ctx, project_id).await?;
        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectRemoved(ProjectRemoved {}),
        )
        .await
    }

    pub async fn add_project_role(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        role_key: &str,
        display_name: &str,
        group: Option<String>,
    ) -> Result<ObjectDetails> {
        require(role_key, "role_key")?;
        require(display_name, "display_name")?;
        let model = self.load_project(ctx, project_id).await?;
        if model.roles.contains(role_key) {
            return Err(Error::validation("role_key", "already defined"));
        }

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectRoleAdded(ProjectRoleAdded {
                role_key: role_key.to_owned(),
                display_name: display_name.to_owned(),
                group,
            }),
        )
        .await
    }

    pub async fn remove_project_role(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        role_key: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_project(ctx, project_id).await?;
        if !model.roles.contains(role_key) {
            return Err(Error::NotFound(format!("project role {role_key}")));
        }

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectRoleRemoved(ProjectRoleRemoved {
                role_key: role_key.to_owned(),
            }),
        )
        .await
    }

    pub async fn add_project_member(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        user_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails> {
        require(user_id, "user_id")?;
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }
        let model = self.load_project(ctx, project_id).await?;
        if model.members.contains_key(user_id) {
            return Err(Error::validation("user_id", "already a member"));
        }

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectMemberAdded(MemberAdded {
                user_id: user_id.to_owned(),
                roles,
            }),
        )
        .await
    }

    pub async fn update_project_member(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        user_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails> {
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }
        let model = self.load_project(ctx, project_id).await?;
        if !model.members.contains_key(user_id) {
            return Err(Error::NotFound(format!("member {user_id}")));
        }

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectMemberChanged(MemberChanged {
                user_id: user_id.to_owned(),
                roles,
            }),
        )
        .await
    }

    pub async fn remove_project_member(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        user_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_project(ctx, project_id).await?;
        if !model.members.contains_key(user_id) {
            return Err(Error::NotFound(format!("member {user_id}")));
        }

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectMemberRemoved(MemberRemoved {
                user_id: user_id.to_owned(),
            }),
        )
        .await
    }

    /// Delegates the project to another org, restricted to roles the
    /// project actually defines.
    pub async fn add_project_grant(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        granted_org_id: &str,
        role_keys: Vec<String>,
    ) -> Result<(String, ObjectDetails)> {
        require(granted_org_id, "granted_org_id")?;
        let model = self.load_project(ctx, project_id).await?;
        if !model.has_roles(&role_keys) {
            return Err(Error::validation("role_keys", "unknown project role"));
        }
        if model
            .grants
            .values()
            .any(|grant| !grant.removed && grant.granted_org_id == granted_org_id)
        {
            return Err(Error::validation("granted_org_id", "org already holds a grant"));
        }

        // The granted org must exist and be live.
        self.require_history(ctx, AggregateKind::Org, granted_org_id)
            .await?;

        let grant_id = self.next_id();
        let details = self
            .project_transition(
                ctx,
                project_id,
                model.version,
                EventPayload::ProjectGrantAdded(ProjectGrantAdded {
                    grant_id: grant_id.clone(),
                    granted_org_id: granted_org_id.to_owned(),
                    role_keys,
                }),
            )
            .await?;
        Ok((grant_id, details))
    }

    pub async fn update_project_grant(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        grant_id: &str,
        role_keys: Vec<String>,
    ) -> Result<ObjectDetails> {
        let model = self.load_project(ctx, project_id).await?;
        if model.live_grant(grant_id).is_none() {
            return Err(Error::NotFound(format!("project grant {grant_id}")));
        }
        if !model.has_roles(&role_keys) {
            return Err(Error::validation("role_keys", "unknown project role"));
        }

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectGrantChanged(ProjectGrantChanged {
                grant_id: grant_id.to_owned(),
                role_keys,
            }),
        )
        .await
    }

    pub async fn remove_project_grant(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        grant_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_project(ctx, project_id).await?;
        if model.live_grant(grant_id).is_none() {
            return Err(Error::NotFound(format!("project grant {grant_id}")));
        }

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectGrantRemoved(ProjectGrantRemoved {
                grant_id: grant_id.to_owned(),
            }),
        )
        .await
    }

    pub async fn add_project_grant_member(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        grant_id: &str,
        user_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails> {
        require(user_id, "user_id")?;
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }
        let model = self.load_project(ctx, project_id).await?;
        let grant = model
            .live_grant(grant_id)
            .ok_or_else(|| Error::NotFound(format!("project grant {grant_id}")))?;
        if grant.members.contains_key(user_id) {
            return Err(Error::validation("user_id", "already a member"));
        }

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectGrantMemberAdded(ProjectGrantMemberAdded {
                grant_id: grant_id.to_owned(),
                user_id: user_id.to_owned(),
                roles,
            }),
        )
        .await
    }

    pub async fn update_project_grant_member(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        grant_id: &str,
        user_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails> {
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }
        let model = self.load_project(ctx, project_id).await?;
        let grant = model
            .live_grant(grant_id)
            .ok_or_else(|| Error::NotFound(format!("project grant {grant_id}")))?;
        if !grant.members.contains_key(user_id) {
            return Err(Error::NotFound(format!("grant member {user_id}")));
        }

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectGrantMemberChanged(ProjectGrantMemberChanged {
                grant_id: grant_id.to_owned(),
                user_id: user_id.to_owned(),
                roles,
            }),
        )
        .await
    }

    pub async fn remove_project_grant_member(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        grant_id: &str,
        user_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_project(ctx, project_id).await?;
        let grant = model
            .live_grant(grant_id)
            .ok_or_else(|| Error::NotFound(format!("project grant {grant_id}")))?;
        if !grant.members.contains_key(user_id) {
            return Err(Error::NotFound(format!("grant member {user_id}")));
        }

        self.project_transition(
            ctx,
            project_id,
            model.version,
            EventPayload::ProjectGrantMemberRemoved(ProjectGrantMemberRemoved {
                grant_id: grant_id.to_owned(),
                user_id: user_id.to_owned(),
            }),
        )
        .await
    }

    async fn project_transition(
        &self,
        ctx: &CommandContext,
        project_id: &str,
        version: i64,
        payload: EventPayload,
    ) -> Result<ObjectDetails> {
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(ctx, project_id, &ctx.resource_owner(), payload)],
                version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    /// Assigns project roles to a user, optionally through a project
    /// grant (cross-org).
    pub async fn add_user_grant(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        project_id: &str,
        project_grant_id: Option<String>,
        roles: Vec<String>,
    ) -> Result<(String, ObjectDetails)> {
        require(user_id, "user_id")?;
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }

        // Both ends must exist.
        self.require_history(ctx, AggregateKind::User, user_id).await?;
        let project = self.load_project(ctx, project_id).await?;
        match &project_grant_id {
            Some(grant_id) => {
                let grant = project
                    .live_grant(grant_id)
                    .ok_or_else(|| Error::NotFound(format!("project grant {grant_id}")))?;
                if !roles.iter().all(|role| grant.roles.contains(role)) {
                    return Err(Error::validation("roles", "role not delegated by the grant"));
                }
            }
            None => {
                if !project.has_roles(&roles) {
                    return Err(Error::validation("roles", "unknown project role"));
                }
            }
        }

        let grant_id = self.next_id();
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    &grant_id,
                    &ctx.resource_owner(),
                    EventPayload::UserGrantAdded(UserGrantAdded {
                        user_id: user_id.to_owned(),
                        project_id: project_id.to_owned(),
                        project_grant_id,
                        roles,
                    }),
                )],
                0,
            )
            .await?;
        Ok((grant_id, ObjectDetails::from_events(&events)))
    }

    pub async fn update_user_grant(
        &self,
        ctx: &CommandContext,
        grant_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails> {
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }
        let history = self
            .require_history(ctx, AggregateKind::UserGrant, grant_id)
            .await?;
        if user_grant_removed(&history.events) {
            return Err(Error::NotFound(format!("user grant {grant_id}")));
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    grant_id,
                    &ctx.resource_owner(),
                    EventPayload::UserGrantChanged(UserGrantChanged { roles }),
                )],
                history.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    pub async fn remove_user_grant(
        &self,
        ctx: &CommandContext,
        grant_id: &str,
    ) -> Result<ObjectDetails> {
        let history = self
            .require_history(ctx, AggregateKind::UserGrant, grant_id)
            .await?;
        if user_grant_removed(&history.events) {
            return Err(Error::NotFound(format!("user grant {grant_id}")));
        }

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    grant_id,
                    &ctx.resource_owner(),
                    EventPayload::UserGrantRemoved(UserGrantRemoved {}),
                )],
                history.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }
}

fn user_grant_removed(events: &[StoreEvent]) -> bool {
    events
        .iter()
        .any(|event| matches!(event.payload, EventPayload::UserGrantRemoved(_)))
}

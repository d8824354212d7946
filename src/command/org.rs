//! Organization lifecycle, domain verification and membership commands.
//! Instance memberships live here too; they share the member event
//! shapes.

use std::collections::HashMap;

use crate::command::{digest, random_secret, require, CommandContext, Commands, ObjectDetails};
use crate::error::{Error, Result};
use crate::event::{
    EventPayload, MemberAdded, MemberChanged, MemberRemoved, OrgAdded, OrgChanged, OrgDeactivated,
    OrgDomainAdded, OrgDomainPrimarySet, OrgDomainRemoved, OrgDomainVerified, OrgReactivated,
    OrgRemoved, StoreEvent,
};
use crate::store::EventFilter;
use crate::types::{AggregateKind, ObjectState};

/// How org domains are proven: serving a token over HTTP or publishing a
/// DNS record. The core only records the choice.
pub const DOMAIN_VALIDATION_HTTP: &str = "http";
pub const DOMAIN_VALIDATION_DNS: &str = "dns";

#[derive(Debug, Clone, Default)]
struct DomainModel {
    is_verified: bool,
    is_primary: bool,
    validation_code: Option<String>,
}

/// Current org state folded from its event history.
#[derive(Debug, Clone)]
pub(crate) struct OrgWriteModel {
    pub version: i64,
    pub state: ObjectState,
    domains: HashMap<String, DomainModel>,
    members: HashMap<String, Vec<String>>,
}

impl OrgWriteModel {
    pub(crate) fn fold(events: &[StoreEvent]) -> Self {
        let mut model = Self {
            version: 0,
            state: ObjectState::Active,
            domains: HashMap::new(),
            members: HashMap::new(),
        };
        for event in events {
            model.version = event.aggregate_version;
            match &event.payload {
                EventPayload::OrgDeactivated(_) => model.state = ObjectState::Inactive,
                EventPayload::OrgReactivated(_) => model.state = ObjectState::Active,
                EventPayload::OrgRemoved(_) => model.state = ObjectState::Removed,
                EventPayload::OrgDomainAdded(added) => {
                    model.domains.insert(
                        added.domain.clone(),
                        DomainModel {
                            validation_code: added.validation_code.clone(),
                            ..DomainModel::default()
                        },
                    );
                }
                EventPayload::OrgDomainVerified(verified) => {
                    if let Some(domain) = model.domains.get_mut(&verified.domain) {
                        domain.is_verified = true;
                    }
                }
                EventPayload::OrgDomainPrimarySet(primary) => {
                    for (name, domain) in model.domains.iter_mut() {
                        domain.is_primary = name == &primary.domain;
                    }
                }
                EventPayload::OrgDomainRemoved(removed) => {
                    model.domains.remove(&removed.domain);
                }
                EventPayload::OrgMemberAdded(MemberAdded { user_id, roles })
                | EventPayload::OrgMemberChanged(MemberChanged { user_id, roles }) => {
                    model.members.insert(user_id.clone(), roles.clone());
                }
                EventPayload::OrgMemberRemoved(MemberRemoved { user_id }) => {
                    model.members.remove(user_id);
                }
                _ => {}
            }
        }
        model
    }

    fn domain(&self, domain: &str) -> Option<&DomainModel> {
        self.domains.get(domain)
    }

    fn has_member(&self, user_id: &str) -> bool {
        self.members.contains_key(user_id)
    }
}

impl Commands {
    async fn load_org(&self, ctx: &CommandContext, org_id: &str) -> Result<OrgWriteModel> {
        let history = self.require_history(ctx, AggregateKind::Org, org_id).await?;
        let model = OrgWriteModel::fold(&history.events);
        if model.state == ObjectState::Removed {
            return Err(Error::NotFound(format!("org {org_id}")));
        }
        Ok(model)
    }

    /// Whether `domain` is already verified by any org of the instance.
    async fn domain_claimed(&self, ctx: &CommandContext, domain: &str) -> Result<bool> {
        let filter = EventFilter::new()
            .instance(ctx.instance_id.clone())
            .aggregate_type(AggregateKind::Org)
            .event_type("org.domain.verified")
            .event_type("org.domain.removed");

        let mut claimed: HashMap<String, String> = HashMap::new();
        for event in self.store().events(&filter).await? {
            match &event.payload {
                EventPayload::OrgDomainVerified(verified) => {
                    claimed.insert(verified.domain.clone(), event.aggregate_id.clone());
                }
                EventPayload::OrgDomainRemoved(removed) => {
                    claimed.remove(&removed.domain);
                }
                _ => {}
            }
        }
        Ok(claimed.contains_key(domain))
    }

    pub async fn add_organization(
        &self,
        ctx: &CommandContext,
        name: &str,
    ) -> Result<(String, ObjectDetails)> {
        ctx.require_instance()?;
        require(name, "name")?;

        let org_id = self.next_id();
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    &org_id,
                    &org_id,
                    EventPayload::OrgAdded(OrgAdded {
                        name: name.to_owned(),
                    }),
                )],
                0,
            )
            .await?;
        Ok((org_id, ObjectDetails::from_events(&events)))
    }

    pub async fn update_organization(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        name: &str,
    ) -> Result<ObjectDetails> {
        require(name, "name")?;
        let model = self.load_org(ctx, org_id).await?;

        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    org_id,
                    org_id,
                    EventPayload::OrgChanged(OrgChanged {
                        name: name.to_owned(),
                    }),
                )],
                model.version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    pub async fn deactivate_organization(
        &self,
        ctx: &CommandContext,
        org_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_org(ctx, org_id).await?;
        if model.state != ObjectState::Active {
            return Err(Error::validation("state", "only active orgs can be deactivated"));
        }
        self.org_transition(ctx, org_id, model.version, EventPayload::OrgDeactivated(OrgDeactivated {}))
            .await
    }

    pub async fn reactivate_organization(
        &self,
        ctx: &CommandContext,
        org_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_org(ctx, org_id).await?;
        if model.state != ObjectState::Inactive {
            return Err(Error::validation("state", "only inactive orgs can be reactivated"));
        }
        self.org_transition(ctx, org_id, model.version, EventPayload::OrgReactivated(OrgReactivated {}))
            .await
    }

    pub async fn remove_organization(
        &self,
        ctx: &CommandContext,
        org_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_org(ctx, org_id).await?;
        self.org_transition(ctx, org_id, model.version, EventPayload::OrgRemoved(OrgRemoved {}))
            .await
    }

    async fn org_transition(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        version: i64,
        payload: EventPayload,
    ) -> Result<ObjectDetails> {
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(ctx, org_id, org_id, payload)],
                version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }

    /// Registers a domain for verification. The clear validation code is
    /// returned exactly once; only its digest enters the log.
    pub async fn add_organization_domain(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        domain: &str,
        validation_type: &str,
    ) -> Result<(String, ObjectDetails)> {
        require(domain, "domain")?;
        if validation_type != DOMAIN_VALIDATION_HTTP && validation_type != DOMAIN_VALIDATION_DNS {
            return Err(Error::validation("validation_type", "must be `http` or `dns`"));
        }
        let model = self.load_org(ctx, org_id).await?;
        if model.domain(domain).is_some() {
            return Err(Error::validation("domain", "already registered on this org"));
        }

        let validation_code = random_secret(16);
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(
                    ctx,
                    org_id,
                    org_id,
                    EventPayload::OrgDomainAdded(OrgDomainAdded {
                        domain: domain.to_owned(),
                        validation_type: validation_type.to_owned(),
                        validation_code: Some(digest(&validation_code)),
                    }),
                )],
                model.version,
            )
            .await?;
        Ok((validation_code, ObjectDetails::from_events(&events)))
    }

    /// Confirms domain ownership with the code handed out at
    /// registration. The domain must not be verified by another org.
    pub async fn verify_organization_domain(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        domain: &str,
        code: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_org(ctx, org_id).await?;
        let registered = model
            .domain(domain)
            .ok_or_else(|| Error::NotFound(format!("domain {domain}")))?;
        if registered.is_verified {
            return Err(Error::validation("domain", "already verified"));
        }
        match &registered.validation_code {
            Some(expected) if *expected == digest(code) => {}
            _ => return Err(Error::validation("validation_code", "code mismatch")),
        }
        if self.domain_claimed(ctx, domain).await? {
            return Err(Error::validation("domain", "verified by another org"));
        }

        self.org_transition(
            ctx,
            org_id,
            model.version,
            EventPayload::OrgDomainVerified(OrgDomainVerified {
                domain: domain.to_owned(),
            }),
        )
        .await
    }

    pub async fn set_primary_organization_domain(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        domain: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_org(ctx, org_id).await?;
        let registered = model
            .domain(domain)
            .ok_or_else(|| Error::NotFound(format!("domain {domain}")))?;
        if !registered.is_verified {
            return Err(Error::validation("domain", "only verified domains can be primary"));
        }
        if registered.is_primary {
            return Err(Error::validation("domain", "already primary"));
        }

        self.org_transition(
            ctx,
            org_id,
            model.version,
            EventPayload::OrgDomainPrimarySet(OrgDomainPrimarySet {
                domain: domain.to_owned(),
            }),
        )
        .await
    }

    pub async fn remove_organization_domain(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        domain: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_org(ctx, org_id).await?;
        let registered = model
            .domain(domain)
            .ok_or_else(|| Error::NotFound(format!("domain {domain}")))?;
        if registered.is_primary {
            return Err(Error::validation("domain", "the primary domain cannot be removed"));
        }

        self.org_transition(
            ctx,
            org_id,
            model.version,
            EventPayload::OrgDomainRemoved(OrgDomainRemoved {
                domain: domain.to_owned(),
            }),
        )
        .await
    }

    pub async fn add_organization_member(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        user_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails> {
        require(user_id, "user_id")?;
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }
        let model = self.load_org(ctx, org_id).await?;
        if model.has_member(user_id) {
            return Err(Error::validation("user_id", "already a member"));
        }

        self.org_transition(
            ctx,
            org_id,
            model.version,
            EventPayload::OrgMemberAdded(MemberAdded {
                user_id: user_id.to_owned(),
                roles,
            }),
        )
        .await
    }

    pub async fn update_organization_member(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        user_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails> {
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }
        let model = self.load_org(ctx, org_id).await?;
        if !model.has_member(user_id) {
            return Err(Error::NotFound(format!("member {user_id}")));
        }

        self.org_transition(
            ctx,
            org_id,
            model.version,
            EventPayload::OrgMemberChanged(MemberChanged {
                user_id: user_id.to_owned(),
                roles,
            }),
        )
        .await
    }

    pub async fn remove_organization_member(
        &self,
        ctx: &CommandContext,
        org_id: &str,
        user_id: &str,
    ) -> Result<ObjectDetails> {
        let model = self.load_org(ctx, org_id).await?;
        if !model.has_member(user_id) {
            return Err(Error::NotFound(format!("member {user_id}")));
        }

        self.org_transition(
            ctx,
            org_id,
            model.version,
            EventPayload::OrgMemberRemoved(MemberRemoved {
                user_id: user_id.to_owned(),
            }),
        )
        .await
    }

    /// Instance members live on the instance aggregate, whose id is the
    /// instance itself.
    pub async fn add_instance_member(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails> {
        ctx.require_instance()?;
        require(user_id, "user_id")?;
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }

        let version = self.instance_member_version(ctx, user_id, false).await?;
        self.instance_transition(
            ctx,
            version,
            EventPayload::InstanceMemberAdded(MemberAdded {
                user_id: user_id.to_owned(),
                roles,
            }),
        )
        .await
    }

    pub async fn update_instance_member(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        roles: Vec<String>,
    ) -> Result<ObjectDetails> {
        if roles.is_empty() {
            return Err(Error::validation("roles", "at least one role is required"));
        }
        let version = self.instance_member_version(ctx, user_id, true).await?;
        self.instance_transition(
            ctx,
            version,
            EventPayload::InstanceMemberChanged(MemberChanged {
                user_id: user_id.to_owned(),
                roles,
            }),
        )
        .await
    }

    pub async fn remove_instance_member(
        &self,
        ctx: &CommandContext,
        user_id: &str,
    ) -> Result<ObjectDetails> {
        let version = self.instance_member_version(ctx, user_id, true).await?;
        self.instance_transition(
            ctx,
            version,
            EventPayload::InstanceMemberRemoved(MemberRemoved {
                user_id: user_id.to_owned(),
            }),
        )
        .await
    }

    /// Folds instance membership, returning the aggregate version and
    /// enforcing presence/absence of the member.
    async fn instance_member_version(
        &self,
        ctx: &CommandContext,
        user_id: &str,
        must_exist: bool,
    ) -> Result<i64> {
        let history = self
            .store()
            .aggregate(&ctx.instance_id, &AggregateKind::Instance, &ctx.instance_id, None)
            .await?;

        let mut members: HashMap<String, Vec<String>> = HashMap::new();
        let mut version = 0;
        if let Some(history) = &history {
            version = history.version;
            for event in &history.events {
                match &event.payload {
                    EventPayload::InstanceMemberAdded(MemberAdded { user_id, roles })
                    | EventPayload::InstanceMemberChanged(MemberChanged { user_id, roles }) => {
                        members.insert(user_id.clone(), roles.clone());
                    }
                    EventPayload::InstanceMemberRemoved(MemberRemoved { user_id }) => {
                        members.remove(user_id);
                    }
                    _ => {}
                }
            }
        }

        let exists = members.contains_key(user_id);
        if must_exist && !exists {
            return Err(Error::NotFound(format!("instance member {user_id}")));
        }
        if !must_exist && exists {
            return Err(Error::validation("user_id", "already a member"));
        }
        Ok(version)
    }

    async fn instance_transition(
        &self,
        ctx: &CommandContext,
        version: i64,
        payload: EventPayload,
    ) -> Result<ObjectDetails> {
        let instance_id = ctx.instance_id.clone();
        let events = self
            .store()
            .push_with_concurrency_check(
                vec![self.command(ctx, &instance_id, &instance_id, payload)],
                version,
            )
            .await?;
        Ok(ObjectDetails::from_events(&events))
    }
}

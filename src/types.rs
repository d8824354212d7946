//! Shared primitive types: log positions, aggregate identity and the
//! lifecycle states of the projected read models.

use serde::{Deserialize, Serialize};

/// Per-aggregate monotonic event counter, starting at 1.
pub type AggregateVersion = i64;

/// A point in the global event log.
///
/// `position` is strictly increasing across the whole log (one value per
/// append transaction); `in_position_order` disambiguates events written
/// in the same transaction. The pair is a total order compatible with
/// commit order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Position {
    pub position: i64,
    pub in_position_order: i32,
}

impl Position {
    pub const fn new(position: i64, in_position_order: i32) -> Self {
        Self {
            position,
            in_position_order,
        }
    }

    /// The position before any event: every stored event sorts after it.
    pub const fn genesis() -> Self {
        Self {
            position: 0,
            in_position_order: 0,
        }
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.position, self.in_position_order)
    }
}

/// The aggregate types known to the core.
///
/// Stored as their snake_case string form; unknown strings round-trip
/// through [`AggregateKind::Other`] so foreign events remain readable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateKind {
    User,
    Org,
    Project,
    Application,
    Instance,
    UserGrant,
    IdpIntent,
    SamlRequest,
    SamlSession,
    #[serde(untagged)]
    Other(String),
}

impl AggregateKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Org => "org",
            Self::Project => "project",
            Self::Application => "application",
            Self::Instance => "instance",
            Self::UserGrant => "user_grant",
            Self::IdpIntent => "idp_intent",
            Self::SamlRequest => "saml_request",
            Self::SamlSession => "saml_session",
            Self::Other(name) => name,
        }
    }
}

impl From<&str> for AggregateKind {
    fn from(value: &str) -> Self {
        match value {
            "user" => Self::User,
            "org" => Self::Org,
            "project" => Self::Project,
            "application" => Self::Application,
            "instance" => Self::Instance,
            "user_grant" => Self::UserGrant,
            "idp_intent" => Self::IdpIntent,
            "saml_request" => Self::SamlRequest,
            "saml_session" => Self::SamlSession,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl std::fmt::Display for AggregateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a user account.
///
/// Stored as its snake_case string form in the read models; `removed`
/// rows are tombstones kept for audit and filtered out of queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserState {
    Initial,
    Active,
    Inactive,
    Locked,
    Removed,
}

impl UserState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Locked => "locked",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "initial" => Self::Initial,
            "inactive" => Self::Inactive,
            "locked" => Self::Locked,
            "removed" => Self::Removed,
            _ => Self::Active,
        }
    }
}

/// Lifecycle shared by orgs, projects and applications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectState {
    Active,
    Inactive,
    Removed,
}

impl ObjectState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Removed => "removed",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "inactive" => Self::Inactive,
            "removed" => Self::Removed,
            _ => Self::Active,
        }
    }
}

/// Application variants carried by the `application` aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKind {
    Oidc,
    Api,
    Saml,
}

impl AppKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Oidc => "oidc",
            Self::Api => "api",
            Self::Saml => "saml",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "api" => Self::Api,
            "saml" => Self::Saml,
            _ => Self::Oidc,
        }
    }
}

/// Membership scopes of the member read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberKind {
    Instance,
    Org,
    Project,
    ProjectGrant,
}

impl MemberKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Org => "org",
            Self::Project => "project",
            Self::ProjectGrant => "project_grant",
        }
    }

    pub fn parse(value: &str) -> Self {
        match value {
            "instance" => Self::Instance,
            "project" => Self::Project,
            "project_grant" => Self::ProjectGrant,
            _ => Self::Org,
        }
    }
}

/// Pagination accepted by every search query. `limit` is capped at
/// [`Pagination::MAX_LIMIT`] rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub offset: i64,
    pub limit: i64,
}

impl Pagination {
    pub const MAX_LIMIT: i64 = 1000;
    pub const DEFAULT_LIMIT: i64 = 100;

    pub fn new(offset: i64, limit: i64) -> Self {
        Self { offset, limit }
    }

    /// Clamps the limit into `1..=MAX_LIMIT` and the offset to `>= 0`.
    pub fn clamped(self) -> Self {
        Self {
            offset: self.offset.max(0),
            limit: self.limit.clamp(1, Self::MAX_LIMIT),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn position_total_order() {
        let a = Position::new(1, 0);
        let b = Position::new(1, 1);
        let c = Position::new(2, 0);
        assert!(a < b);
        assert!(b < c);
        assert!(Position::genesis() < a);
    }

    #[test]
    fn aggregate_kind_round_trips() {
        for kind in ["user", "org", "project", "application", "saml_request"] {
            assert_eq!(AggregateKind::from(kind).as_str(), kind);
        }
        assert_eq!(AggregateKind::from("widget").as_str(), "widget");
    }

    #[test]
    fn pagination_clamps() {
        let p = Pagination::new(-3, 10_000).clamped();
        assert_eq!(p.offset, 0);
        assert_eq!(p.limit, Pagination::MAX_LIMIT);
    }
}

//! Static role → permission mapping.
//!
//! The `manage` action subsumes every other action on the same
//! resource. Project-defined role keys (from user grants and project
//! grants) are not listed here; they pass through as scoped
//! `project.role` permissions.

/// Actions granted by a role, as `(resource, action)` pairs.
pub fn permissions_for_role(role: &str) -> &'static [(&'static str, &'static str)] {
    match role {
        "IAM_OWNER" => &[
            ("iam.instance", "manage"),
            ("iam.org", "manage"),
            ("iam.user", "manage"),
            ("iam.project", "manage"),
            ("iam.app", "manage"),
            ("iam.grant", "manage"),
        ],
        "IAM_ADMIN" => &[
            ("iam.instance", "read"),
            ("iam.org", "read"),
            ("iam.user", "read"),
        ],
        "ORG_OWNER" => &[
            ("iam.org", "manage"),
            ("iam.user", "manage"),
            ("iam.project", "manage"),
            ("iam.app", "manage"),
            ("iam.grant", "manage"),
        ],
        "ORG_ADMIN" => &[
            ("iam.project", "manage"),
            ("iam.org", "read"),
            ("iam.user", "read"),
        ],
        "ORG_USER" => &[("iam.org", "read"), ("iam.project", "read")],
        "PROJECT_OWNER" => &[
            ("iam.project", "manage"),
            ("iam.app", "manage"),
            ("iam.grant", "manage"),
        ],
        "PROJECT_ADMIN" => &[("iam.app", "manage"), ("iam.project", "read")],
        "PROJECT_USER" => &[("iam.project", "read"), ("iam.app", "read")],
        "PROJECT_GRANT_OWNER" => &[("iam.grant", "manage"), ("iam.project", "read")],
        _ => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_roles_expand() {
        assert!(permissions_for_role("IAM_OWNER")
            .iter()
            .any(|(resource, action)| *resource == "iam.instance" && *action == "manage"));
        assert!(permissions_for_role("ORG_ADMIN")
            .iter()
            .any(|(resource, action)| *resource == "iam.project" && *action == "manage"));
    }

    #[test]
    fn unknown_roles_expand_to_nothing() {
        assert!(permissions_for_role("CUSTOM_ROLE").is_empty());
    }
}

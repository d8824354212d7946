//! Password hashing (argon2id) and policy validation.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;

use crate::config::PasswordPolicy;
use crate::error::{Error, PolicyViolation, Result};

/// Hashes a clear password into its PHC string form.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|error| Error::validation("password", error.to_string()))
}

/// Verifies a clear password against a stored PHC string.
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(hash)
        .map_err(|error| Error::validation("password_hash", error.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// Applies the policy, failing with [`Error::PasswordPolicy`] listing
/// every violated rule.
pub fn validate_password(password: &str, policy: &PasswordPolicy) -> Result<()> {
    let mut violations = Vec::new();

    if password.chars().count() < policy.min_length {
        violations.push(PolicyViolation {
            rule: "min_length".to_owned(),
            message: format!("password must be at least {} characters", policy.min_length),
        });
    }
    if policy.require_uppercase && !password.chars().any(|c| c.is_uppercase()) {
        violations.push(PolicyViolation {
            rule: "require_uppercase".to_owned(),
            message: "password must contain an uppercase letter".to_owned(),
        });
    }
    if policy.require_lowercase && !password.chars().any(|c| c.is_lowercase()) {
        violations.push(PolicyViolation {
            rule: "require_lowercase".to_owned(),
            message: "password must contain a lowercase letter".to_owned(),
        });
    }
    if policy.require_number && !password.chars().any(|c| c.is_ascii_digit()) {
        violations.push(PolicyViolation {
            rule: "require_number".to_owned(),
            message: "password must contain a digit".to_owned(),
        });
    }
    if policy.require_symbol && password.chars().all(|c| c.is_alphanumeric()) {
        violations.push(PolicyViolation {
            rule: "require_symbol".to_owned(),
            message: "password must contain a symbol".to_owned(),
        });
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(Error::PasswordPolicy { violations })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_round_trip() {
        let hash = hash_password("Correct-Horse1").unwrap();
        assert!(verify_password("Correct-Horse1", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }

    #[test]
    fn policy_collects_all_violations() {
        let policy = PasswordPolicy::builder().require_symbol(true).build();
        let error = validate_password("short", &policy).unwrap_err();
        match error {
            Error::PasswordPolicy { violations } => {
                let rules: Vec<&str> =
                    violations.iter().map(|violation| violation.rule.as_str()).collect();
                assert!(rules.contains(&"min_length"));
                assert!(rules.contains(&"require_uppercase"));
                assert!(rules.contains(&"require_number"));
                assert!(rules.contains(&"require_symbol"));
                assert!(!rules.contains(&"require_lowercase"));
            }
            other => panic!("expected policy error, got {other:?}"),
        }
    }

    #[test]
    fn compliant_password_passes() {
        let policy = PasswordPolicy::default();
        assert!(validate_password("Sup3rSecret", &policy).is_ok());
    }
}

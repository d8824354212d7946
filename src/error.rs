//! Crate-wide error taxonomy.
//!
//! Every fallible operation in the core surfaces one of these tagged
//! variants. Transport adapters map them onto protocol codes; the core
//! never formats messages for end users beyond the `message` fields.

/// A single password policy violation, kept as a stable machine-readable
/// label plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PolicyViolation {
    pub rule: String,
    pub message: String,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Malformed input on a command or query.
    #[error("validation failed on `{field}`: {message}")]
    Validation { field: String, message: String },

    /// The requested entity does not exist or is tombstoned.
    #[error("{0} not found")]
    NotFound(String),

    /// Optimistic-lock clash on an aggregate push.
    #[error("concurrency check failed: expected version {expected}, actual {actual}")]
    Concurrency { expected: i64, actual: i64 },

    /// Authorization rejection with a stable code (e.g. `SAML-perm01`).
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("session expired")]
    SessionExpired,

    #[error("token expired")]
    TokenExpired,

    #[error("invalid credentials")]
    InvalidCredentials,

    /// Authentication requires a second factor; `mfa_token` resumes the flow.
    #[error("multi-factor authentication required")]
    MfaRequired { mfa_token: String },

    #[error("password policy violated ({} rules)", violations.len())]
    PasswordPolicy { violations: Vec<PolicyViolation> },

    /// Database or cache unavailability.
    #[error(transparent)]
    Integration(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Shorthand for a [`Error::Validation`] with owned strings.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true when the error is the optimistic-lock clash.
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

impl From<sqlx::Error> for Error {
    fn from(value: sqlx::Error) -> Self {
        Self::Integration(Box::new(value))
    }
}

impl From<serde_json::Error> for Error {
    fn from(value: serde_json::Error) -> Self {
        Self::Integration(Box::new(value))
    }
}

/// Convenience alias used across the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

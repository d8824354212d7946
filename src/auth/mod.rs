//! Authentication: password verification, the MFA gate, and session +
//! token minting.

pub mod password;
pub mod totp;

pub use password::{hash_password, validate_password, verify_password};

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use uuid::Uuid;

use crate::config::PasswordPolicy;
use crate::error::{Error, Result};
use crate::kv::KvStore;
use crate::query::users::User;
use crate::query::UserQueries;
use crate::session::SessionService;
use crate::token::{TokenPair, TokenPayload, TokenService};
use crate::types::UserState;

/// How long an MFA continuation token stays redeemable.
const MFA_TOKEN_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Default)]
pub struct AuthRequest {
    pub username: String,
    pub password: String,
    pub instance_id: String,
    pub mfa_code: Option<String>,
    pub metadata: Value,
}

/// A completed authentication: the caller holds a session and a token
/// pair.
#[derive(Debug, Clone)]
pub struct AuthSuccess {
    pub user_id: String,
    pub session_id: String,
    pub tokens: TokenPair,
}

pub struct AuthProvider {
    users: UserQueries,
    sessions: Arc<SessionService>,
    tokens: Arc<TokenService>,
    kv: Arc<dyn KvStore>,
    policy: PasswordPolicy,
}

impl AuthProvider {
    pub fn new(
        users: UserQueries,
        sessions: Arc<SessionService>,
        tokens: Arc<TokenService>,
        kv: Arc<dyn KvStore>,
        policy: PasswordPolicy,
    ) -> Self {
        Self {
            users,
            sessions,
            tokens,
            kv,
            policy,
        }
    }

    /// The full login flow: user lookup, password check, MFA gate,
    /// session creation and token minting.
    ///
    /// Lookup and password failures are indistinguishable
    /// ([`Error::InvalidCredentials`]) so usernames cannot be probed.
    #[tracing::instrument(skip_all, fields(instance_id = %request.instance_id))]
    pub async fn authenticate(&self, request: &AuthRequest) -> Result<AuthSuccess> {
        let user = self
            .users
            .by_username(&request.instance_id, &request.username)
            .await?
            .ok_or(Error::InvalidCredentials)?;

        if user.state != UserState::Active {
            return Err(Error::InvalidCredentials);
        }

        let hash = user
            .password_hash
            .as_deref()
            .ok_or(Error::InvalidCredentials)?;
        if !password::verify_password(&request.password, hash)? {
            return Err(Error::InvalidCredentials);
        }

        if let Some(secret) = self.mfa_secret(&user) {
            match &request.mfa_code {
                None => {
                    let mfa_token = Uuid::new_v4().to_string();
                    self.kv
                        .set(
                            &format!("mfa:{mfa_token}"),
                            serde_json::json!({ "user_id": user.id }),
                            Some(MFA_TOKEN_TTL),
                        )
                        .await?;
                    return Err(Error::MfaRequired { mfa_token });
                }
                Some(code) => {
                    if !totp::verify_code(secret, code)? {
                        return Err(Error::InvalidCredentials);
                    }
                }
            }
        }

        let session = self
            .sessions
            .create(&user.id, &request.instance_id, request.metadata.clone())
            .await?;

        let tokens = self
            .tokens
            .generate_token_pair(&TokenPayload {
                user_id: user.id.clone(),
                instance_id: request.instance_id.clone(),
                org_id: Some(user.org_id.clone()),
                email: Some(user.email.clone()),
                roles: None,
            })
            .await?;

        tracing::debug!(user_id = %user.id, session_id = %session.id, "authentication succeeded");

        Ok(AuthSuccess {
            user_id: user.id,
            session_id: session.id,
            tokens,
        })
    }

    /// Applies the configured password policy.
    pub fn validate_password(&self, password: &str) -> Result<()> {
        password::validate_password(password, &self.policy)
    }

    /// Applies an explicit policy instead of the configured one.
    pub fn validate_password_with(&self, password: &str, policy: &PasswordPolicy) -> Result<()> {
        password::validate_password(password, policy)
    }

    fn mfa_secret<'a>(&self, user: &'a User) -> Option<&'a str> {
        match (&user.otp_secret, user.otp_verified) {
            (Some(secret), true) => Some(secret.as_str()),
            _ => None,
        }
    }
}

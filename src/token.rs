//! Access/refresh token pairs (HS256 JWTs) with revocation and
//! single-use refresh.
//!
//! The kv store carries two key families: `refresh:{jti}` marks a
//! refresh token as still spendable (deleted on use), `revoked:{jti}`
//! is the revocation set, kept for the token's remaining lifetime.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::TokenConfig;
use crate::error::{Error, Result};
use crate::kv::KvStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims carried by both tokens of a pair; the refresh token repeats
/// the identity claims so a pair can be re-minted from it alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub token_type: TokenType,
    pub instance_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
}

/// Identity minted into a token pair.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TokenPayload {
    pub user_id: String,
    pub instance_id: String,
    pub org_id: Option<String>,
    pub email: Option<String>,
    pub roles: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

pub struct TokenService {
    config: TokenConfig,
    store: Arc<dyn KvStore>,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl TokenService {
    pub fn new(config: TokenConfig, store: Arc<dyn KvStore>) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());
        Self {
            config,
            store,
            encoding_key,
            decoding_key,
        }
    }

    fn refresh_key(jti: &str) -> String {
        format!("refresh:{jti}")
    }

    fn revoked_key(jti: &str) -> String {
        format!("revoked:{jti}")
    }

    fn claims(
        &self,
        payload: &TokenPayload,
        token_type: TokenType,
        ttl: Duration,
    ) -> (TokenClaims, DateTime<Utc>) {
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(15));
        let claims = TokenClaims {
            sub: payload.user_id.clone(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            exp: expires_at.timestamp(),
            iat: now.timestamp(),
            jti: Uuid::new_v4().to_string(),
            token_type,
            instance_id: payload.instance_id.clone(),
            org_id: payload.org_id.clone(),
            email: payload.email.clone(),
            roles: payload.roles.clone(),
        };
        (claims, expires_at)
    }

    fn encode(&self, claims: &TokenClaims) -> Result<String> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|error| Error::validation("token", error.to_string()))
    }

    fn decode(&self, token: &str) -> Result<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.set_audience(&[self.config.audience.as_str()]);

        match decode::<TokenClaims>(token, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(error) => match error.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(Error::TokenExpired),
                _ => Err(Error::validation("token", error.to_string())),
            },
        }
    }

    /// Mints a fresh access/refresh pair with distinct `jti`s and
    /// registers the refresh token as spendable.
    pub async fn generate_token_pair(&self, payload: &TokenPayload) -> Result<TokenPair> {
        let (access_claims, access_expires_at) =
            self.claims(payload, TokenType::Access, self.config.access_ttl);
        let (refresh_claims, refresh_expires_at) =
            self.claims(payload, TokenType::Refresh, self.config.refresh_ttl);

        self.store
            .set(
                &Self::refresh_key(&refresh_claims.jti),
                serde_json::json!({ "sub": refresh_claims.sub }),
                Some(self.config.refresh_ttl),
            )
            .await?;

        Ok(TokenPair {
            access_token: self.encode(&access_claims)?,
            refresh_token: self.encode(&refresh_claims)?,
            access_expires_at,
            refresh_expires_at,
        })
    }

    /// Verifies signature, expiry and revocation, returning the claims.
    pub async fn verify_token(&self, token: &str) -> Result<TokenClaims> {
        let claims = self.decode(token)?;
        if self.store.exists(&Self::revoked_key(&claims.jti)).await? {
            return Err(Error::validation("token", "token has been revoked"));
        }
        Ok(claims)
    }

    /// Spends a refresh token: the presented token becomes unusable and
    /// a new pair is minted. Presenting an access token, a revoked
    /// token, or an already-spent refresh token fails.
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<TokenPair> {
        let claims = self.verify_token(refresh_token).await?;
        if claims.token_type != TokenType::Refresh {
            return Err(Error::validation(
                "token",
                "only refresh tokens can be exchanged",
            ));
        }

        // Atomic spend: of any concurrent callers presenting this jti,
        // exactly one takes the marker and mints the next pair.
        if self
            .store
            .take(&Self::refresh_key(&claims.jti))
            .await?
            .is_none()
        {
            return Err(Error::validation("token", "refresh token already used"));
        }

        let payload = TokenPayload {
            user_id: claims.sub,
            instance_id: claims.instance_id,
            org_id: claims.org_id,
            email: claims.email,
            roles: claims.roles,
        };
        self.generate_token_pair(&payload).await
    }

    /// Adds the token's `jti` to the revocation set for its remaining
    /// lifetime; a refresh token also loses its spendable marker.
    pub async fn revoke_token(&self, token: &str) -> Result<()> {
        let claims = self.decode(token)?;
        let remaining = (claims.exp - Utc::now().timestamp()).max(1) as u64;
        self.store
            .set(
                &Self::revoked_key(&claims.jti),
                serde_json::Value::Bool(true),
                Some(Duration::from_secs(remaining)),
            )
            .await?;
        if claims.token_type == TokenType::Refresh {
            self.store.delete(&Self::refresh_key(&claims.jti)).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKvStore;

    fn service(access_ttl: Duration) -> TokenService {
        TokenService::new(
            TokenConfig::builder()
                .secret("test-secret")
                .access_ttl(access_ttl)
                .build(),
            Arc::new(MemoryKvStore::new()),
        )
    }

    fn payload() -> TokenPayload {
        TokenPayload {
            user_id: "u1".to_owned(),
            instance_id: "inst-1".to_owned(),
            org_id: Some("o1".to_owned()),
            email: Some("alice@acme.test".to_owned()),
            roles: Some(vec!["ORG_ADMIN".to_owned()]),
        }
    }

    #[tokio::test]
    async fn pair_carries_distinct_jtis_and_claims() {
        let tokens = service(Duration::from_secs(60));
        let pair = tokens.generate_token_pair(&payload()).await.unwrap();

        let access = tokens.verify_token(&pair.access_token).await.unwrap();
        let refresh = tokens.verify_token(&pair.refresh_token).await.unwrap();

        assert_eq!(access.token_type, TokenType::Access);
        assert_eq!(refresh.token_type, TokenType::Refresh);
        assert_ne!(access.jti, refresh.jti);
        assert_eq!(access.sub, "u1");
        assert_eq!(access.instance_id, "inst-1");
        assert_eq!(access.org_id.as_deref(), Some("o1"));
    }

    #[tokio::test]
    async fn refresh_is_single_use() {
        let tokens = service(Duration::from_secs(60));
        let pair = tokens.generate_token_pair(&payload()).await.unwrap();

        let second = tokens.refresh_token(&pair.refresh_token).await.unwrap();
        // The spent token is dead; the newly minted one works exactly once.
        assert!(tokens.refresh_token(&pair.refresh_token).await.is_err());
        let third = tokens.refresh_token(&second.refresh_token).await.unwrap();
        assert!(tokens.refresh_token(&second.refresh_token).await.is_err());
        tokens.verify_token(&third.access_token).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_refreshes_spend_the_token_once() {
        let tokens = Arc::new(service(Duration::from_secs(60)));
        let pair = tokens.generate_token_pair(&payload()).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let tokens = Arc::clone(&tokens);
            let refresh = pair.refresh_token.clone();
            tasks.push(tokio::spawn(
                async move { tokens.refresh_token(&refresh).await },
            ));
        }

        let mut wins = 0;
        for task in tasks {
            if task.await.unwrap().is_ok() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1, "a refresh token is spendable exactly once");
    }

    #[tokio::test]
    async fn access_tokens_cannot_refresh() {
        let tokens = service(Duration::from_secs(60));
        let pair = tokens.generate_token_pair(&payload()).await.unwrap();
        assert!(tokens.refresh_token(&pair.access_token).await.is_err());
    }

    #[tokio::test]
    async fn revoked_tokens_fail_verification() {
        let tokens = service(Duration::from_secs(60));
        let pair = tokens.generate_token_pair(&payload()).await.unwrap();

        tokens.revoke_token(&pair.access_token).await.unwrap();
        assert!(tokens.verify_token(&pair.access_token).await.is_err());
        // The refresh token is untouched by revoking the access token.
        tokens.verify_token(&pair.refresh_token).await.unwrap();
    }

    #[tokio::test]
    async fn expired_access_token_is_reported_as_expired() {
        let tokens = service(Duration::from_secs(1));
        let pair = tokens.generate_token_pair(&payload()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2100)).await;
        assert!(matches!(
            tokens.verify_token(&pair.access_token).await,
            Err(Error::TokenExpired)
        ));
    }
}

//! Boundary to the hosted identity provider.
//!
//! The session manager only needs `refresh_session` and `get_user`; the other
//! calls back the login and logout flows.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::session::{SessionPolicy, UserProfile};
use crate::api::ApiError;

/// Tokens issued by a sign-in or refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: String,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Absolute expiry in epoch seconds
    #[serde(default)]
    pub expires_at: Option<i64>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

impl TokenGrant {
    /// Absolute expiry of the access token.
    ///
    /// A relative lifetime is measured against the local clock, which is the
    /// same clock the expiry checks run against.
    pub fn expiry(&self, policy: &SessionPolicy, now: DateTime<Utc>) -> DateTime<Utc> {
        if let Some(secs) = self.expires_in {
            return now + Duration::seconds(secs);
        }
        if let Some(at) = self.expires_at.and_then(|secs| DateTime::from_timestamp(secs, 0)) {
            return at;
        }
        now + policy.default_token_lifetime
    }
}

/// Registration details for a new account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    pub phone: Option<String>,
}

/// What the provider returned for a sign-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSignUp {
    /// Account is usable immediately
    Grant(TokenGrant),
    /// Account exists but must be confirmed (e.g. by email link) first
    Pending(UserProfile),
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<TokenGrant, ApiError>;

    async fn sign_up(&self, request: &SignUpRequest) -> Result<ProviderSignUp, ApiError>;

    /// Exchange a refresh token for a new token pair
    async fn refresh_session(&self, refresh_token: &str) -> Result<TokenGrant, ApiError>;

    /// Fetch the user that owns `access_token`
    async fn get_user(&self, access_token: &str) -> Result<UserProfile, ApiError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(expires_in: Option<i64>, expires_at: Option<i64>) -> TokenGrant {
        TokenGrant {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_in,
            expires_at,
            user: None,
        }
    }

    #[test]
    fn test_expiry_prefers_relative_lifetime() {
        let now = Utc::now();
        let policy = SessionPolicy::default();
        let expiry = grant(Some(600), Some(1)).expiry(&policy, now);
        assert_eq!(expiry, now + Duration::seconds(600));
    }

    #[test]
    fn test_expiry_falls_back_to_absolute_then_default() {
        let now = Utc::now();
        let policy = SessionPolicy::default();

        let absolute = grant(None, Some(4_102_444_800)).expiry(&policy, now);
        assert_eq!(absolute.timestamp(), 4_102_444_800);

        let fallback = grant(None, None).expiry(&policy, now);
        assert_eq!(fallback, now + policy.default_token_lifetime);
    }
}

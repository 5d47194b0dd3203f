//! Identity provider client for a GoTrue-compatible auth service.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::{ApiClient, ApiError};
use crate::auth::{IdentityProvider, ProviderSignUp, SignUpRequest, TokenGrant, UserProfile};

const TOKEN_PATH: &str = "/auth/v1/token";
const SIGNUP_PATH: &str = "/auth/v1/signup";
const USER_PATH: &str = "/auth/v1/user";
const LOGOUT_PATH: &str = "/auth/v1/logout";

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    expires_in: Option<i64>,
    expires_at: Option<i64>,
    user: Option<UserResponse>,
}

#[derive(Debug, Default, Deserialize)]
struct UserMetadata {
    full_name: Option<String>,
    display_name: Option<String>,
    avatar_url: Option<String>,
    role: Option<String>,
    phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    email: Option<String>,
    phone: Option<String>,
    #[serde(default)]
    user_metadata: Option<UserMetadata>,
}

/// Sign-up answers with a full session when confirmation is off, else just the user
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session(TokenResponse),
    User(UserResponse),
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl UserResponse {
    fn into_profile(self) -> UserProfile {
        let metadata = self.user_metadata.unwrap_or_default();
        UserProfile {
            id: self.id,
            email: self.email.unwrap_or_default(),
            display_name: non_empty(metadata.full_name).or(non_empty(metadata.display_name)),
            phone: non_empty(self.phone).or(non_empty(metadata.phone)),
            role: non_empty(metadata.role),
            avatar_url: non_empty(metadata.avatar_url),
        }
    }
}

impl TokenResponse {
    fn into_grant(self) -> TokenGrant {
        TokenGrant {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_in: self.expires_in,
            expires_at: self.expires_at,
            user: self.user.map(UserResponse::into_profile),
        }
    }
}

/// Auth endpoints of the hosted backend.
#[derive(Clone)]
pub struct AuthApi {
    api: ApiClient,
}

impl AuthApi {
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }
}

#[async_trait]
impl IdentityProvider for AuthApi {
    async fn sign_in(&self, email: &str, password: &str) -> Result<TokenGrant, ApiError> {
        let path = format!("{}?grant_type=password", TOKEN_PATH);
        let body = json!({ "email": email, "password": password });
        let response: TokenResponse = self.api.post_json(&path, &body, None).await?;
        Ok(response.into_grant())
    }

    async fn sign_up(&self, request: &SignUpRequest) -> Result<ProviderSignUp, ApiError> {
        let body = json!({
            "email": request.email.trim(),
            "password": request.password,
            "data": {
                "full_name": request.display_name,
                "phone": request.phone,
            },
        });
        let response: SignUpResponse = self.api.post_json(SIGNUP_PATH, &body, None).await?;
        Ok(match response {
            SignUpResponse::Session(session) => ProviderSignUp::Grant(session.into_grant()),
            SignUpResponse::User(user) => ProviderSignUp::Pending(user.into_profile()),
        })
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<TokenGrant, ApiError> {
        let path = format!("{}?grant_type=refresh_token", TOKEN_PATH);
        let body = json!({ "refresh_token": refresh_token });
        let response: TokenResponse = self.api.post_json(&path, &body, None).await?;
        Ok(response.into_grant())
    }

    async fn get_user(&self, access_token: &str) -> Result<UserProfile, ApiError> {
        let user: UserResponse = self.api.get_json(USER_PATH, Some(access_token)).await?;
        Ok(user.into_profile())
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), ApiError> {
        self.api.post_no_content(LOGOUT_PATH, Some(access_token)).await
    }
}

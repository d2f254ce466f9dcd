use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum AuthProviderError {
    #[error("auth provider unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The provider answered with a non-success status (bad credentials,
    /// expired code, duplicate email...).
    #[error("auth provider rejected the request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("mock auth provider failure")]
    Simulated,
}

/// SessionTokens
///
/// The part of a GoTrue session this service keeps (as cookies).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
}

// 1. AuthProvider Contract
/// AuthProvider
///
/// The user-scoped (anonymous key) half of the backend: identity operations only.
/// Profile data never flows through here.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Creates the auth user and returns its id, which becomes the profile id.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Uuid, AuthProviderError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionTokens, AuthProviderError>;

    /// Exchanges a one-time auth code (email confirmation, OAuth callback)
    /// for a session.
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<SessionTokens, AuthProviderError>;

    /// Revokes the session behind the access token.
    async fn sign_out(&self, access_token: &str) -> Result<(), AuthProviderError>;
}

/// AuthProviderState
///
/// The concrete type used to share the auth provider across the application state.
pub type AuthProviderState = Arc<dyn AuthProvider>;

// 2. The Real Implementation (Supabase GoTrue)
/// SupabaseAuthClient
///
/// Talks to `{SUPABASE_URL}/auth/v1` with the public anon key.
#[derive(Clone)]
pub struct SupabaseAuthClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    redirect_to: Option<String>,
}

#[derive(Deserialize)]
struct AuthUserRecord {
    id: Uuid,
}

/// GoTrue answers sign-up with a session when auto-confirm is on and with the
/// bare user otherwise.
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session { user: AuthUserRecord },
    User { id: Uuid },
}

impl SupabaseAuthClient {
    pub fn new(supabase_url: &str, anon_key: &str, redirect_to: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("{}/auth/v1", supabase_url.trim_end_matches('/')),
            anon_key: anon_key.to_string(),
            redirect_to,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
    }

    async fn reject(response: reqwest::Response) -> AuthProviderError {
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("unreadable error body: {e}"));
        // GoTrue has used all three keys for the human-readable part over time.
        let message = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|value| {
                ["msg", "error_description", "message"]
                    .iter()
                    .find_map(|key| value.get(*key)?.as_str().map(str::to_string))
            })
            .unwrap_or(body);
        AuthProviderError::Rejected { status, message }
    }

    async fn session_from(response: reqwest::Response) -> Result<SessionTokens, AuthProviderError> {
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }
        Ok(response.json::<SessionTokens>().await?)
    }
}

#[async_trait]
impl AuthProvider for SupabaseAuthClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Uuid, AuthProviderError> {
        let mut request = self.post("/signup");
        if let Some(redirect) = &self.redirect_to {
            request = request.query(&[("redirect_to", redirect.as_str())]);
        }
        let response = request
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }

        let id = match response.json::<SignUpResponse>().await? {
            SignUpResponse::Session { user } => user.id,
            SignUpResponse::User { id } => id,
        };
        tracing::info!(user_id = %id, "auth user created");
        Ok(id)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<SessionTokens, AuthProviderError> {
        let response = self
            .post("/token")
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }))
            .send()
            .await?;
        Self::session_from(response).await
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: Option<&str>,
    ) -> Result<SessionTokens, AuthProviderError> {
        let response = self
            .post("/token")
            .query(&[("grant_type", "pkce")])
            .json(&json!({ "auth_code": code, "code_verifier": code_verifier }))
            .send()
            .await?;
        Self::session_from(response).await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), AuthProviderError> {
        let response = self
            .post("/logout")
            .bearer_auth(access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::reject(response).await);
        }
        Ok(())
    }
}

// 3. The Mock Implementation (For Tests)
/// MockAuthProvider
///
/// Deterministic stand-in for GoTrue. Sign-in succeeds for any credentials
/// unless `should_fail` is set; code exchange succeeds only for `accepted_code`.
#[derive(Clone)]
pub struct MockAuthProvider {
    pub should_fail: bool,
    pub user_id: Uuid,
    pub tokens: SessionTokens,
    pub accepted_code: Option<String>,
}

impl MockAuthProvider {
    pub fn new() -> Self {
        Self {
            should_fail: false,
            user_id: Uuid::new_v4(),
            tokens: SessionTokens {
                access_token: "mock-access-token".to_string(),
                refresh_token: "mock-refresh-token".to_string(),
                expires_in: 3600,
            },
            accepted_code: None,
        }
    }

    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new()
        }
    }

    pub fn with_tokens(mut self, access_token: impl Into<String>) -> Self {
        self.tokens.access_token = access_token.into();
        self
    }

    pub fn accepting_code(mut self, code: impl Into<String>) -> Self {
        self.accepted_code = Some(code.into());
        self
    }

    fn rejected(message: &str) -> AuthProviderError {
        AuthProviderError::Rejected {
            status: 400,
            message: message.to_string(),
        }
    }
}

impl Default for MockAuthProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    async fn sign_up(&self, _email: &str, _password: &str) -> Result<Uuid, AuthProviderError> {
        if self.should_fail {
            return Err(AuthProviderError::Simulated);
        }
        Ok(self.user_id)
    }

    async fn sign_in_with_password(
        &self,
        _email: &str,
        _password: &str,
    ) -> Result<SessionTokens, AuthProviderError> {
        if self.should_fail {
            return Err(Self::rejected("Invalid login credentials"));
        }
        Ok(self.tokens.clone())
    }

    async fn exchange_code(
        &self,
        code: &str,
        _code_verifier: Option<&str>,
    ) -> Result<SessionTokens, AuthProviderError> {
        match &self.accepted_code {
            Some(accepted) if accepted == code && !self.should_fail => Ok(self.tokens.clone()),
            _ => Err(Self::rejected("invalid flow state")),
        }
    }

    async fn sign_out(&self, _access_token: &str) -> Result<(), AuthProviderError> {
        if self.should_fail {
            return Err(AuthProviderError::Simulated);
        }
        Ok(())
    }
}

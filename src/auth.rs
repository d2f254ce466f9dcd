use axum::{
    extract::FromRequestParts,
    http::{HeaderMap, header, request::Parts},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    access::Role,
    config::{AppConfig, Env},
    error::AppError,
    models::UserProfile,
    permissions::Permission,
    repository::ProfileDirectory,
    supabase::SessionTokens,
};

pub const ACCESS_TOKEN_COOKIE: &str = "sb-access-token";
pub const REFRESH_TOKEN_COOKIE: &str = "sb-refresh-token";
pub const CODE_VERIFIER_COOKIE: &str = "sb-code-verifier";
/// Header accepted as identity in `Env::Local` only.
pub const DEV_USER_HEADER: &str = "x-user-id";

/// Audience Supabase stamps on tokens of signed-in users.
const SUPABASE_AUDIENCE: &str = "authenticated";

/// Claims
///
/// The subset of a Supabase access token this service relies on.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (sub): the auth user id, which is also the profile id.
    pub sub: Uuid,
    pub email: Option<String>,
    pub aud: String,
    pub exp: usize,
    pub iat: usize,
}

/// Identity
///
/// Who the credentials say the caller is, before any profile lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: Option<String>,
}

/// ProfileIssue
///
/// Why an authenticated identity has no usable profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileIssue {
    NotFound,
    NoRole,
    UnknownRole,
    /// The lookup itself failed. Treated as a denial, never retried.
    LookupFailed,
}

impl ProfileIssue {
    pub const ALL: [ProfileIssue; 4] = [
        ProfileIssue::NotFound,
        ProfileIssue::NoRole,
        ProfileIssue::UnknownRole,
        ProfileIssue::LookupFailed,
    ];

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|issue| issue.login_error_tag() == tag)
    }

    /// Text shown next to the login form.
    pub fn description(self) -> &'static str {
        match self {
            ProfileIssue::NotFound => "Your account has no profile yet. Please contact support.",
            ProfileIssue::NoRole => "Your account has no role assigned. Please contact support.",
            ProfileIssue::UnknownRole => "We could not work out where to send you. Please contact support.",
            ProfileIssue::LookupFailed => "We could not load your profile. Please try again shortly.",
        }
    }

    /// The display-only tag carried by the login redirect.
    pub fn login_error_tag(self) -> &'static str {
        match self {
            ProfileIssue::NotFound => "profile_not_found",
            ProfileIssue::NoRole => "no_role",
            ProfileIssue::UnknownRole => "routing_failed",
            ProfileIssue::LookupFailed => "lookup_failed",
        }
    }
}

/// SessionState
///
/// Outcome of session resolution for one request.
#[derive(Debug, Clone)]
pub enum SessionState {
    Unauthenticated,
    NoProfile(ProfileIssue),
    Authenticated(UserProfile),
}

/// access_token
///
/// `Authorization: Bearer` wins over the session cookie.
pub fn access_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::to_string);
    bearer.or_else(|| {
        CookieJar::from_headers(headers)
            .get(ACCESS_TOKEN_COOKIE)
            .map(|cookie| cookie.value().to_string())
    })
}

/// with_session_cookies
///
/// Stores a fresh session. `secure` is on outside `Env::Local`.
pub fn with_session_cookies(jar: CookieJar, tokens: &SessionTokens, secure: bool) -> CookieJar {
    let build = |name: &'static str, value: &str| {
        Cookie::build((name, value.to_string()))
            .path("/")
            .http_only(true)
            .secure(secure)
            .same_site(SameSite::Lax)
    };
    jar.add(build(ACCESS_TOKEN_COOKIE, &tokens.access_token))
        .add(build(REFRESH_TOKEN_COOKIE, &tokens.refresh_token))
        .remove(Cookie::build(CODE_VERIFIER_COOKIE).path("/"))
}

pub fn without_session_cookies(jar: CookieJar) -> CookieJar {
    jar.remove(Cookie::build(ACCESS_TOKEN_COOKIE).path("/"))
        .remove(Cookie::build(REFRESH_TOKEN_COOKIE).path("/"))
}

/// authenticate
///
/// Turns request credentials into an `Identity`, without touching the database:
/// 1. Configuration: an unconfigured service has no secret and trusts nobody.
/// 2. Local Bypass: in `Env::Local` a valid UUID in `x-user-id` is accepted.
/// 3. Token Extraction: bearer header first, then the session cookie.
/// 4. Validation: HS256 signature, `authenticated` audience and expiry.
pub fn authenticate(headers: &HeaderMap, config: &AppConfig) -> Option<Identity> {
    // 1. Configuration
    let secret = config.jwt_secret()?;

    // 2. Local Development Bypass
    if config.env == Env::Local {
        let bypass = headers
            .get(DEV_USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|raw| Uuid::parse_str(raw).ok());
        if let Some(user_id) = bypass {
            tracing::debug!(%user_id, "local identity bypass");
            return Some(Identity {
                user_id,
                email: None,
            });
        }
    }

    // 3. Token Extraction
    let token = access_token(headers)?;

    // 4. Decode and Validate
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    validation.set_audience(&[SUPABASE_AUDIENCE]);

    match decode::<Claims>(&token, &DecodingKey::from_secret(secret.as_bytes()), &validation) {
        Ok(data) => Some(Identity {
            user_id: data.claims.sub,
            email: data.claims.email,
        }),
        Err(e) => {
            match e.kind() {
                ErrorKind::ExpiredSignature => tracing::debug!("access token expired"),
                other => tracing::debug!(reason = ?other, "access token rejected"),
            }
            None
        }
    }
}

/// resolve_session
///
/// Credentials → identity → profile. Read-only. Every failure past a valid
/// identity is reported as a `ProfileIssue` so the caller can send the user
/// back to login with a reason.
pub async fn resolve_session(
    headers: &HeaderMap,
    config: &AppConfig,
    directory: &dyn ProfileDirectory,
) -> SessionState {
    // 1. Identity
    let Some(identity) = authenticate(headers, config) else {
        return SessionState::Unauthenticated;
    };

    // 2. Privileged Profile Lookup. Errors fail closed.
    let record = match directory.find_profile(identity.user_id).await {
        Ok(Some(record)) => record,
        Ok(None) => return SessionState::NoProfile(ProfileIssue::NotFound),
        Err(e) => {
            tracing::error!(user_id = %identity.user_id, error = %e, "profile lookup failed");
            return SessionState::NoProfile(ProfileIssue::LookupFailed);
        }
    };

    // 3. Role Validation
    let role = match record.role.as_deref().map(str::trim) {
        None | Some("") => return SessionState::NoProfile(ProfileIssue::NoRole),
        Some(raw) => match raw.parse::<Role>() {
            Ok(role) => role,
            Err(e) => {
                tracing::warn!(user_id = %identity.user_id, error = %e, "stored role not recognised");
                return SessionState::NoProfile(ProfileIssue::UnknownRole);
            }
        },
    };

    // 4. Blood Bank Link, only meaningful for bank accounts. A failed link
    //    lookup degrades to "unlinked" rather than blocking the session.
    let blood_bank_id = if role == Role::BloodBank {
        directory
            .find_blood_bank_link(identity.user_id)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(user_id = %identity.user_id, error = %e, "blood bank link lookup failed");
                None
            })
    } else {
        None
    };

    SessionState::Authenticated(UserProfile::from_record(record, role, blood_bank_id))
}

/// CurrentUser
///
/// The profile the interceptor resolved for this request. Handlers behind the
/// interceptor take it as an argument; it rejects with 401 anywhere else.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserProfile);

impl CurrentUser {
    pub fn require(&self, permission: Permission) -> Result<(), AppError> {
        if self.0.grant.grants(permission) {
            Ok(())
        } else {
            Err(AppError::Forbidden(permission))
        }
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<UserProfile>()
            .cloned()
            .map(CurrentUser)
            .ok_or(AppError::Unauthenticated)
    }
}

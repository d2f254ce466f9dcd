use axum::{
    extract::{Query, Request, State},
    http::Uri,
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::{
    AppState,
    access::{AccessPolicy, DASHBOARD_PATH, LOGIN_PATH, LOGOUT_PATH, Principal, ROOT_PATH, is_auth_page},
    auth::{CODE_VERIFIER_COOKIE, SessionState, resolve_session, with_session_cookies},
    config::Env,
};

/// Decision
///
/// What the interceptor does with a request once the session is known.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Proceed,
    Redirect(String),
}

impl Decision {
    fn redirect(to: &str) -> Self {
        Decision::Redirect(to.to_string())
    }
}

/// decide
///
/// Pure routing decision for one request. Holds no state, so evaluating the
/// same session and path twice always gives the same answer.
pub fn decide(session: &SessionState, path: &str, policy: &AccessPolicy) -> Decision {
    match session {
        SessionState::Unauthenticated => {
            if policy.permits(Principal::Guest, path) {
                Decision::Proceed
            } else {
                Decision::redirect(LOGIN_PATH)
            }
        }
        // Auth pages stay reachable, otherwise the login redirect would loop.
        SessionState::NoProfile(issue) => {
            if is_auth_page(path) {
                Decision::Proceed
            } else {
                Decision::Redirect(format!("{LOGIN_PATH}?error={}", issue.login_error_tag()))
            }
        }
        SessionState::Authenticated(profile) => {
            let role = profile.role();
            let home = role.home_route();

            if path == LOGOUT_PATH {
                return Decision::Proceed;
            }
            if is_auth_page(path) || path == ROOT_PATH {
                return Decision::redirect(home);
            }
            if path.trim_end_matches('/') == DASHBOARD_PATH {
                return Decision::redirect(home);
            }
            if !policy.permits(Principal::Member(role), path) {
                tracing::info!(user_id = %profile.id, %role, path, "route denied, sending home");
                return Decision::redirect(home);
            }
            Decision::Proceed
        }
    }
}

#[derive(Deserialize)]
struct AuthCallback {
    code: Option<String>,
}

fn auth_code(uri: &Uri) -> Option<String> {
    Query::<AuthCallback>::try_from_uri(uri)
        .ok()
        .and_then(|Query(callback)| callback.code)
        .filter(|code| !code.is_empty())
}

/// route_interceptor
///
/// Runs in front of every page and API route, including the 404 fallback:
/// 1. Auth Callback: a `?code=` parameter is exchanged for a session.
/// 2. Session Resolution: credentials, then the profile behind them.
/// 3. Decision: the pure `decide` step picks proceed or redirect.
/// 4. Hand-off: on proceed, the resolved profile rides along in request
///    extensions for the `CurrentUser` extractor.
pub async fn route_interceptor(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Response {
    // 1. Auth Callback. A failed exchange is not fatal; the request carries on
    //    as whatever session it already has.
    if let Some(code) = auth_code(request.uri()) {
        let verifier = jar
            .get(CODE_VERIFIER_COOKIE)
            .map(|cookie| cookie.value().to_string());
        match state.auth.exchange_code(&code, verifier.as_deref()).await {
            Ok(tokens) => {
                tracing::info!("auth code exchanged for a session");
                let secure = state.config.env == Env::Production;
                let jar = with_session_cookies(jar, &tokens, secure);
                return (jar, Redirect::to(ROOT_PATH)).into_response();
            }
            Err(e) => tracing::warn!(error = %e, "auth code exchange failed"),
        }
    }

    // 2. Session Resolution
    let session = resolve_session(request.headers(), &state.config, state.directory.as_ref()).await;
    let path = request.uri().path().to_string();

    // 3. Decision
    match decide(&session, &path, &state.policy()) {
        Decision::Redirect(to) => {
            tracing::debug!(from = %path, %to, "interceptor redirect");
            Redirect::to(&to).into_response()
        }
        // 4. Hand-off
        Decision::Proceed => {
            if let SessionState::Authenticated(profile) = session {
                request.extensions_mut().insert(profile);
            }
            next.run(request).await
        }
    }
}

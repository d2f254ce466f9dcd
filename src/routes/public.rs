use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// The only paths a guest may open: `/` and everything under `/auth`.
/// Signed-in users hitting these are sent to their landing route by the
/// interceptor, except for logout.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /
        // Landing page for guests.
        .route("/", get(handlers::home))
        // GET /auth/login?error=...  |  POST /auth/login
        // The page echoes a known error tag for display. POST signs in with a
        // password and stores the session cookies.
        .route(
            "/auth/login",
            get(handlers::login_page).post(handlers::sign_in),
        )
        // POST /auth/sign-up
        // Creates the auth user and its profile. Admin accounts are refused.
        .route("/auth/sign-up", post(handlers::sign_up))
        // POST /auth/logout
        // Best-effort revoke, then the session cookies are cleared.
        .route("/auth/logout", post(handlers::sign_out))
}

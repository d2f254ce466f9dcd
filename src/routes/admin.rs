use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, put},
};

/// Admin Router Module
///
/// Nested under `/admin`. The interceptor already restricts the zone to the
/// admin role; each handler additionally requires its own permission, so an
/// admin whose grant was narrowed gets a 403 rather than the page.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/users
        // All profiles, newest first. Requires can_manage_users.
        .route("/users", get(handlers::list_users))
        // PUT /admin/users/{id}/permissions
        // Per-user permission changes on top of the role defaults. Audited with the diff.
        .route(
            "/users/{id}/permissions",
            put(handlers::update_user_permissions),
        )
        // PUT /admin/users/{id}/role
        // Moves a user to another role and resets their permissions to its defaults.
        .route("/users/{id}/role", put(handlers::update_user_role))
        // GET /admin/audit-logs?limit=...
        // Requires can_view_audit_logs.
        .route("/audit-logs", get(handlers::list_audit_logs))
        .route("/blood-banks", get(handlers::blood_banks_page))
}

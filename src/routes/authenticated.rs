use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, put},
};

/// Authenticated Router Module
///
/// Pages that need a resolved profile. The interceptor has placed the
/// `UserProfile` in request extensions before any of these run, so handlers
/// take `CurrentUser` and only check the permission their page needs.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /dashboard/{segment}
        // Role dashboards. Bare `/dashboard` never gets here; it is redirected.
        .route("/dashboard/{segment}", get(handlers::dashboard))
        // --- General zone ---
        .route("/profile", get(handlers::profile_page))
        .route("/settings", get(handlers::settings_page))
        .route("/notifications", get(handlers::notifications_page))
        .route("/community", get(handlers::community_page))
        .route("/donations", get(handlers::donations_page))
        // --- Donor zone ---
        .route("/donations/schedule", get(handlers::schedule_donation_page))
        .route("/donations/history", get(handlers::donation_history_page))
        // --- Recipient zone ---
        .route("/blood-requests/new", get(handlers::new_blood_request_page))
        .route(
            "/blood-requests/history",
            get(handlers::blood_request_history_page),
        )
        // --- Blood bank zone ---
        .route("/blood-bank", get(handlers::blood_bank_page))
        // POST /blood-bank/inventory records a batch at the caller's own bank.
        .route(
            "/blood-bank/inventory",
            get(handlers::inventory_page).post(handlers::add_inventory),
        )
        .route("/blood-bank/donations", get(handlers::bank_donations_page))
        .route(
            "/blood-bank/donations/{id}/status",
            put(handlers::update_donation_status),
        )
        .route("/blood-bank/requests", get(handlers::bank_requests_page))
        .route(
            "/blood-bank/requests/{id}/status",
            put(handlers::update_request_status),
        )
        // GET/POST /blood-bank/staff, DELETE /blood-bank/staff/{user_id}
        // Staff of the caller's own blood bank. Needs can_manage_staff and a
        // linked bank; every change is audited.
        .route(
            "/blood-bank/staff",
            get(handlers::list_staff).post(handlers::add_staff),
        )
        .route("/blood-bank/staff/{user_id}", delete(handlers::remove_staff))
}

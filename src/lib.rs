use axum::{
    Router,
    extract::FromRef,
    http::HeaderName,
    middleware,
    routing::get,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Access control core: roles, route zones and permissions.
pub mod access;
pub mod permissions;

// Session resolution, request interception and the backend services behind them.
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod interceptor;
pub mod models;
pub mod repository;
pub mod supabase;

// Module for routing segregation (Public, Authenticated, Admin).
pub mod routes;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use access::AccessPolicy;
pub use config::AppConfig;
pub use repository::{AuditedDirectory, DirectoryState, PostgresRepository, RepositoryState};
pub use supabase::{AuthProviderState, MockAuthProvider, SupabaseAuthClient};

/// ApiDoc
///
/// OpenAPI description of every page and action, served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::home, handlers::login_page, handlers::sign_in, handlers::sign_up,
        handlers::sign_out, handlers::dashboard, handlers::profile_page, handlers::settings_page,
        handlers::notifications_page, handlers::community_page, handlers::donations_page,
        handlers::schedule_donation_page, handlers::donation_history_page,
        handlers::new_blood_request_page, handlers::blood_request_history_page,
        handlers::blood_bank_page, handlers::inventory_page, handlers::bank_donations_page,
        handlers::bank_requests_page, handlers::update_donation_status,
        handlers::update_request_status, handlers::add_inventory, handlers::list_staff, handlers::add_staff,
        handlers::remove_staff, handlers::blood_banks_page, handlers::list_users,
        handlers::update_user_permissions, handlers::update_user_role, handlers::list_audit_logs
    ),
    components(
        schemas(
            access::Role, permissions::Permission, permissions::PermissionSet,
            permissions::PermissionChange, permissions::PermissionDiff,
            models::SignInRequest, models::SignUpRequest, models::RoleChangeRequest,
            models::AddStaffRequest, models::StaffRole, models::StaffMember,
            models::ProfileSummary, models::AuditLogEntry, models::PageView,
            models::DashboardView, models::LandingView, models::ProfileView,
            models::GrantView, models::MessageResponse, models::DonationStatus,
            models::RequestStatus, models::BloodType, models::DonationStatusUpdate,
            models::RequestStatusUpdate, models::AddInventoryRequest, models::InventoryCreated,
        )
    ),
    tags(
        (name = "blood-portal", description = "Blood donation portal access and routing API")
    )
)]
struct ApiDoc;

/// AppState
///
/// Single immutable container for the services every request shares.
#[derive(Clone)]
pub struct AppState {
    /// Writes and listings: profiles, grants, staff, audit log.
    pub repo: RepositoryState,
    /// Privileged profile reads used by the session resolver.
    pub directory: DirectoryState,
    /// User-scoped auth operations (sign-in, sign-up, code exchange).
    pub auth: AuthProviderState,
    pub config: AppConfig,
}

impl AppState {
    pub fn policy(&self) -> AccessPolicy {
        AccessPolicy::new(self.config.unmatched_routes)
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for AuthProviderState {
    fn from_ref(app_state: &AppState) -> AuthProviderState {
        app_state.auth.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Every page and auth route runs behind the route interceptor, including the
/// fallback, so unknown paths are subject to the same session rules. Health
/// and API docs stay outside it.
pub fn create_router(state: AppState) -> Router {
    let intercepted = Router::new()
        .merge(public::public_routes())
        .merge(authenticated::authenticated_routes())
        .nest("/admin", admin::admin_routes())
        .fallback(handlers::not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            interceptor::route_interceptor,
        ));

    let base_router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(intercepted)
        .with_state(state);

    with_observability(base_router)
}

/// create_unconfigured_router
///
/// Served when the backend settings are missing: health still answers, every
/// other path gets the setup notice.
pub fn create_unconfigured_router() -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .fallback(handlers::configuration_missing);

    with_observability(router)
}

/// with_observability
///
/// Request id generation and propagation, a tracing span per request, and CORS.
fn with_observability(router: Router) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Opens the per-request span, tagged with the `x-request-id` set above so all
/// log lines of one request correlate.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}

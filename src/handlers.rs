use crate::{
    AppState,
    access::{DASHBOARD_PATH, LOGIN_PATH, ROOT_PATH, Role, exclusive_prefixes, general_prefixes},
    auth::{CurrentUser, ProfileIssue, access_token, with_session_cookies, without_session_cookies},
    config::{AppConfig, Env},
    error::AppError,
    models::{
        AddInventoryRequest, AddStaffRequest, AuditEntry, AuditLogEntry, DashboardView,
        DonationStatusUpdate, GrantView, InventoryCreated, LandingView, MessageResponse,
        NewInventory, NewProfile, PageView, ProfileRecord, ProfileSummary, ProfileView,
        RequestStatusUpdate, RoleChangeRequest, SignInRequest, SignUpRequest, StaffMember,
    },
    permissions::{Permission, PermissionDiff, PermissionSet, RoleGrant},
    repository::RepositoryState,
    supabase::{AuthProviderError, AuthProviderState},
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

const DEFAULT_AUDIT_LIMIT: i64 = 100;
const MAX_AUDIT_LIMIT: i64 = 500;

// --- Query Structs ---

/// LoginQuery
///
/// Parameters a login redirect may carry. Display only; nothing here is trusted.
#[derive(Deserialize, utoipa::IntoParams)]
pub struct LoginQuery {
    /// One of `profile_not_found`, `no_role`, `routing_failed`, `lookup_failed`.
    pub error: Option<String>,
}

#[derive(Deserialize, utoipa::IntoParams)]
pub struct AuditLogQuery {
    /// Clamped to 1..=500. Defaults to 100.
    pub limit: Option<i64>,
}

// --- Helpers ---

fn secure_cookies(config: &AppConfig) -> bool {
    config.env == Env::Production
}

fn page(user: &CurrentUser, name: &str) -> Json<PageView> {
    Json(PageView::for_user(name, &user.0))
}

fn gated_page(
    user: &CurrentUser,
    name: &str,
    permission: Permission,
) -> Result<Json<PageView>, AppError> {
    user.require(permission)?;
    Ok(page(user, name))
}

// --- Public Pages & Auth ---

#[utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Landing page", body = LandingView))
)]
pub async fn home() -> Json<LandingView> {
    Json(LandingView {
        page: "home".to_string(),
        ..Default::default()
    })
}

/// login_page
///
/// Echoes a known error tag back for display. Unknown tags are dropped.
#[utoipa::path(
    get,
    path = "/auth/login",
    params(LoginQuery),
    responses((status = 200, description = "Login page", body = LandingView))
)]
pub async fn login_page(Query(query): Query<LoginQuery>) -> Json<LandingView> {
    let issue = query.error.as_deref().and_then(ProfileIssue::from_tag);
    Json(LandingView {
        page: "login".to_string(),
        error: issue.map(|i| i.login_error_tag().to_string()),
        message: issue.map(|i| i.description().to_string()),
    })
}

/// sign_in
///
/// Password sign-in against the auth provider. The session is stored in
/// HttpOnly cookies and the browser is sent to `/`, where the interceptor
/// forwards it to the role's landing route.
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = SignInRequest,
    responses(
        (status = 303, description = "Signed in, redirect to /"),
        (status = 400, description = "Missing email or password"),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn sign_in(
    State(auth): State<AuthProviderState>,
    State(config): State<AppConfig>,
    jar: CookieJar,
    Json(payload): Json<SignInRequest>,
) -> Result<(CookieJar, Redirect), AppError> {
    let email = payload.email.trim();
    if email.is_empty() || payload.password.is_empty() {
        return Err(AppError::BadRequest(
            "email and password are required".to_string(),
        ));
    }

    let tokens = auth
        .sign_in_with_password(email, &payload.password)
        .await
        .map_err(|e| match e {
            AuthProviderError::Rejected { status, .. } => {
                tracing::info!(status, "password sign-in rejected");
                AppError::InvalidCredentials
            }
            other => AppError::AuthProvider(other),
        })?;

    tracing::info!("password sign-in succeeded");
    let jar = with_session_cookies(jar, &tokens, secure_cookies(&config));
    Ok((jar, Redirect::to(ROOT_PATH)))
}

/// sign_up
///
/// Creates the auth user, then its profile seeded with the role defaults.
/// Admin accounts are never self-registered.
#[utoipa::path(
    post,
    path = "/auth/sign-up",
    request_body = SignUpRequest,
    responses(
        (status = 201, description = "Account created", body = MessageResponse),
        (status = 400, description = "Invalid sign-up data"),
        (status = 500, description = "Profile setup failed after the account was created")
    )
)]
pub async fn sign_up(
    State(auth): State<AuthProviderState>,
    State(repo): State<RepositoryState>,
    Json(payload): Json<SignUpRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let email = payload.email.trim().to_string();
    let full_name = payload.full_name.trim().to_string();
    if email.is_empty() || payload.password.is_empty() || full_name.is_empty() {
        return Err(AppError::BadRequest(
            "email, password and full_name are required".to_string(),
        ));
    }

    let role = payload
        .role
        .trim()
        .parse::<Role>()
        .map_err(|e| AppError::BadRequest(e.to_string()))?;
    if role == Role::Admin {
        return Err(AppError::BadRequest(
            "admin accounts cannot be created through sign-up".to_string(),
        ));
    }

    let user_id = auth
        .sign_up(&email, &payload.password)
        .await
        .map_err(|e| match e {
            AuthProviderError::Rejected { message, .. } => AppError::BadRequest(message),
            other => AppError::AuthProvider(other),
        })?;

    repo.create_profile(NewProfile {
        id: user_id,
        email,
        full_name,
        phone: payload.phone,
        blood_type: payload.blood_type,
        grant: RoleGrant::new(role),
    })
    .await
    .map_err(AppError::ProfileSetup)?;

    tracing::info!(%user_id, %role, "account created");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Account created. Check your email to confirm your address.".to_string(),
        }),
    ))
}

/// sign_out
///
/// Revocation is best effort: the cookies are cleared either way.
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses((status = 303, description = "Signed out, redirect to /auth/login"))
)]
pub async fn sign_out(
    State(auth): State<AuthProviderState>,
    jar: CookieJar,
    headers: HeaderMap,
) -> (CookieJar, Redirect) {
    if let Some(token) = access_token(&headers) {
        if let Err(e) = auth.sign_out(&token).await {
            tracing::warn!(error = %e, "session revoke failed, clearing cookies anyway");
        }
    }
    (without_session_cookies(jar), Redirect::to(LOGIN_PATH))
}

// --- Dashboards & General Pages ---

/// dashboard
///
/// Role dashboards under `/dashboard/{segment}`. The interceptor has already
/// kept other roles out; admins may open any of them.
#[utoipa::path(
    get,
    path = "/dashboard/{segment}",
    params(("segment" = String, Path, description = "admin, blood-bank, donor or recipient")),
    responses(
        (status = 200, description = "Dashboard", body = DashboardView),
        (status = 404, description = "Unknown dashboard")
    )
)]
pub async fn dashboard(
    user: CurrentUser,
    Path(segment): Path<String>,
) -> Result<Json<DashboardView>, AppError> {
    let dashboard = Role::from_dashboard_segment(&segment).ok_or(AppError::NotFound)?;

    let quick_links = exclusive_prefixes(dashboard)
        .into_iter()
        .chain(general_prefixes())
        .filter(|link| !link.starts_with(DASHBOARD_PATH))
        .map(str::to_string)
        .collect();

    Ok(Json(DashboardView {
        dashboard,
        viewer: PageView::for_user(&format!("dashboard/{segment}"), &user.0),
        full_name: user.0.full_name.clone(),
        quick_links,
    }))
}

#[utoipa::path(
    get,
    path = "/profile",
    responses((status = 200, description = "Own profile", body = ProfileView))
)]
pub async fn profile_page(user: CurrentUser) -> Json<ProfileView> {
    Json(ProfileView::from(&user.0))
}

#[utoipa::path(get, path = "/settings", responses((status = 200, description = "Page", body = PageView)))]
pub async fn settings_page(user: CurrentUser) -> Json<PageView> {
    page(&user, "settings")
}

#[utoipa::path(get, path = "/notifications", responses((status = 200, description = "Page", body = PageView)))]
pub async fn notifications_page(user: CurrentUser) -> Json<PageView> {
    page(&user, "notifications")
}

#[utoipa::path(get, path = "/community", responses((status = 200, description = "Page", body = PageView)))]
pub async fn community_page(user: CurrentUser) -> Json<PageView> {
    page(&user, "community")
}

#[utoipa::path(get, path = "/donations", responses((status = 200, description = "Page", body = PageView)))]
pub async fn donations_page(user: CurrentUser) -> Json<PageView> {
    page(&user, "donations")
}

// --- Donor & Recipient Pages ---

#[utoipa::path(
    get,
    path = "/donations/schedule",
    responses((status = 200, description = "Page", body = PageView), (status = 403, description = "Missing can_schedule_donations"))
)]
pub async fn schedule_donation_page(user: CurrentUser) -> Result<Json<PageView>, AppError> {
    gated_page(&user, "donations/schedule", Permission::CanScheduleDonations)
}

#[utoipa::path(
    get,
    path = "/donations/history",
    responses((status = 200, description = "Page", body = PageView), (status = 403, description = "Missing can_view_donation_history"))
)]
pub async fn donation_history_page(user: CurrentUser) -> Result<Json<PageView>, AppError> {
    gated_page(&user, "donations/history", Permission::CanViewDonationHistory)
}

#[utoipa::path(
    get,
    path = "/blood-requests/new",
    responses((status = 200, description = "Page", body = PageView), (status = 403, description = "Missing can_create_requests"))
)]
pub async fn new_blood_request_page(user: CurrentUser) -> Result<Json<PageView>, AppError> {
    gated_page(&user, "blood-requests/new", Permission::CanCreateRequests)
}

#[utoipa::path(
    get,
    path = "/blood-requests/history",
    responses((status = 200, description = "Page", body = PageView), (status = 403, description = "Missing can_view_requests"))
)]
pub async fn blood_request_history_page(user: CurrentUser) -> Result<Json<PageView>, AppError> {
    gated_page(&user, "blood-requests/history", Permission::CanViewRequests)
}

// --- Blood Bank Pages ---

#[utoipa::path(get, path = "/blood-bank", responses((status = 200, description = "Page", body = PageView)))]
pub async fn blood_bank_page(user: CurrentUser) -> Json<PageView> {
    page(&user, "blood-bank")
}

#[utoipa::path(
    get,
    path = "/blood-bank/inventory",
    responses((status = 200, description = "Page", body = PageView), (status = 403, description = "Missing can_manage_inventory"))
)]
pub async fn inventory_page(user: CurrentUser) -> Result<Json<PageView>, AppError> {
    gated_page(&user, "blood-bank/inventory", Permission::CanManageInventory)
}

#[utoipa::path(
    get,
    path = "/blood-bank/donations",
    responses((status = 200, description = "Page", body = PageView), (status = 403, description = "Missing can_manage_donations"))
)]
pub async fn bank_donations_page(user: CurrentUser) -> Result<Json<PageView>, AppError> {
    gated_page(&user, "blood-bank/donations", Permission::CanManageDonations)
}

#[utoipa::path(
    get,
    path = "/blood-bank/requests",
    responses((status = 200, description = "Page", body = PageView), (status = 403, description = "Missing can_manage_requests"))
)]
pub async fn bank_requests_page(user: CurrentUser) -> Result<Json<PageView>, AppError> {
    gated_page(&user, "blood-bank/requests", Permission::CanManageRequests)
}

// --- Blood Bank Operations ---

/// bank_scope
///
/// Which bank's rows the caller may change. Admins act across banks; anyone
/// else is held to the bank their account is linked to.
fn bank_scope(user: &CurrentUser) -> Result<Option<Uuid>, AppError> {
    if user.0.role() == Role::Admin {
        return Ok(None);
    }
    user.0.blood_bank_id.map(Some).ok_or(AppError::NoLinkedBloodBank)
}

#[utoipa::path(
    put,
    path = "/blood-bank/donations/{id}/status",
    params(("id" = Uuid, Path, description = "Donation ID")),
    request_body = DonationStatusUpdate,
    responses(
        (status = 200, description = "Status updated", body = MessageResponse),
        (status = 403, description = "Missing can_manage_donations or no linked blood bank"),
        (status = 404, description = "No such donation at this blood bank")
    )
)]
pub async fn update_donation_status(
    user: CurrentUser,
    State(repo): State<RepositoryState>,
    Path(donation_id): Path<Uuid>,
    Json(update): Json<DonationStatusUpdate>,
) -> Result<Json<MessageResponse>, AppError> {
    user.require(Permission::CanManageDonations)?;
    let scope = bank_scope(&user)?;
    if update.units_donated.is_some_and(|units| units <= 0) {
        return Err(AppError::BadRequest(
            "units_donated must be positive".to_string(),
        ));
    }

    let audit = AuditEntry {
        user_id: user.0.id,
        action: "update_donation_status".to_string(),
        table_name: Some("donations".to_string()),
        record_id: Some(donation_id.to_string()),
        old_values: None,
        new_values: Some(json!(update)),
    };

    if !repo
        .update_donation_status(donation_id, &update, scope, audit)
        .await?
    {
        return Err(AppError::NotFound);
    }

    tracing::info!(%donation_id, status = update.status.as_str(), "donation status updated");
    Ok(Json(MessageResponse {
        message: "Donation status updated".to_string(),
    }))
}

/// update_request_status
///
/// Moves a blood request along its lifecycle. A blood bank acting on an
/// unassigned request takes it on.
#[utoipa::path(
    put,
    path = "/blood-bank/requests/{id}/status",
    params(("id" = Uuid, Path, description = "Blood request ID")),
    request_body = RequestStatusUpdate,
    responses(
        (status = 200, description = "Status updated", body = MessageResponse),
        (status = 403, description = "Missing can_manage_requests or no linked blood bank"),
        (status = 404, description = "No such request, or handled by another blood bank")
    )
)]
pub async fn update_request_status(
    user: CurrentUser,
    State(repo): State<RepositoryState>,
    Path(request_id): Path<Uuid>,
    Json(update): Json<RequestStatusUpdate>,
) -> Result<Json<MessageResponse>, AppError> {
    user.require(Permission::CanManageRequests)?;
    let scope = bank_scope(&user)?;

    let audit = AuditEntry {
        user_id: user.0.id,
        action: "update_request_status".to_string(),
        table_name: Some("blood_requests".to_string()),
        record_id: Some(request_id.to_string()),
        old_values: None,
        new_values: Some(json!({ "status": update.status, "blood_bank_id": scope })),
    };

    if !repo
        .update_request_status(request_id, update.status, scope, audit)
        .await?
    {
        return Err(AppError::NotFound);
    }

    tracing::info!(%request_id, status = update.status.as_str(), "blood request status updated");
    Ok(Json(MessageResponse {
        message: "Blood request status updated".to_string(),
    }))
}

/// add_inventory
///
/// Records a collected batch at the caller's blood bank.
#[utoipa::path(
    post,
    path = "/blood-bank/inventory",
    request_body = AddInventoryRequest,
    responses(
        (status = 201, description = "Batch recorded", body = InventoryCreated),
        (status = 400, description = "Invalid batch"),
        (status = 403, description = "Missing can_manage_inventory or no linked blood bank")
    )
)]
pub async fn add_inventory(
    user: CurrentUser,
    State(repo): State<RepositoryState>,
    Json(payload): Json<AddInventoryRequest>,
) -> Result<(StatusCode, Json<InventoryCreated>), AppError> {
    user.require(Permission::CanManageInventory)?;
    let bank_id = user.0.blood_bank_id.ok_or(AppError::NoLinkedBloodBank)?;

    if payload.units_available <= 0 {
        return Err(AppError::BadRequest(
            "units_available must be positive".to_string(),
        ));
    }
    if payload.expiry_date <= payload.collection_date {
        return Err(AppError::BadRequest(
            "expiry_date must be after collection_date".to_string(),
        ));
    }

    let batch = NewInventory {
        id: Uuid::new_v4(),
        blood_bank_id: bank_id,
        blood_type: payload.blood_type,
        units_available: payload.units_available,
        collection_date: payload.collection_date,
        expiry_date: payload.expiry_date,
        donor_id: payload.donor_id,
        batch_number: payload.batch_number.filter(|b| !b.trim().is_empty()),
    };
    let audit = AuditEntry {
        user_id: user.0.id,
        action: "add_inventory".to_string(),
        table_name: Some("blood_inventory".to_string()),
        record_id: Some(batch.id.to_string()),
        old_values: None,
        new_values: Some(json!({
            "blood_bank_id": bank_id,
            "blood_type": batch.blood_type,
            "units_available": batch.units_available,
            "expiry_date": batch.expiry_date,
        })),
    };

    repo.add_inventory(&batch, audit).await?;

    tracing::info!(%bank_id, batch_id = %batch.id, blood_type = batch.blood_type.as_str(), "inventory batch added");
    Ok((
        StatusCode::CREATED,
        Json(InventoryCreated {
            id: batch.id,
            blood_bank_id: bank_id,
        }),
    ))
}

// --- Blood Bank Staff ---

/// The bank whose staff the caller manages.
fn managed_bank(user: &CurrentUser) -> Result<Uuid, AppError> {
    user.require(Permission::CanManageStaff)?;
    user.0.blood_bank_id.ok_or(AppError::NoLinkedBloodBank)
}

#[utoipa::path(
    get,
    path = "/blood-bank/staff",
    responses(
        (status = 200, description = "Staff of the caller's blood bank", body = [StaffMember]),
        (status = 403, description = "Missing can_manage_staff or no linked blood bank")
    )
)]
pub async fn list_staff(
    user: CurrentUser,
    State(repo): State<RepositoryState>,
) -> Result<Json<Vec<StaffMember>>, AppError> {
    let bank_id = managed_bank(&user)?;
    Ok(Json(repo.list_staff(bank_id).await?))
}

/// add_staff
///
/// Adds an existing account, found by email, to the caller's blood bank.
#[utoipa::path(
    post,
    path = "/blood-bank/staff",
    request_body = AddStaffRequest,
    responses(
        (status = 201, description = "Staff member added", body = MessageResponse),
        (status = 404, description = "No account with that email"),
        (status = 409, description = "Already on the staff list")
    )
)]
pub async fn add_staff(
    user: CurrentUser,
    State(repo): State<RepositoryState>,
    Json(payload): Json<AddStaffRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), AppError> {
    let bank_id = managed_bank(&user)?;
    let email = payload.email.trim();
    if email.is_empty() {
        return Err(AppError::BadRequest("email is required".to_string()));
    }

    let member_id = repo
        .find_user_id_by_email(email)
        .await?
        .ok_or(AppError::NotFound)?;

    let audit = AuditEntry {
        user_id: user.0.id,
        action: "add_staff".to_string(),
        table_name: Some("blood_bank_staff".to_string()),
        record_id: Some(member_id.to_string()),
        old_values: None,
        new_values: Some(json!({
            "blood_bank_id": bank_id,
            "user_id": member_id,
            "role": payload.role,
        })),
    };

    if !repo.add_staff(bank_id, member_id, payload.role, audit).await? {
        return Err(AppError::Conflict(
            "user is already a staff member of this blood bank".to_string(),
        ));
    }

    tracing::info!(%bank_id, %member_id, "staff member added");
    Ok((
        StatusCode::CREATED,
        Json(MessageResponse {
            message: "Staff member added".to_string(),
        }),
    ))
}

#[utoipa::path(
    delete,
    path = "/blood-bank/staff/{user_id}",
    params(("user_id" = Uuid, Path, description = "Staff member's user ID")),
    responses(
        (status = 204, description = "Removed"),
        (status = 404, description = "Not a staff member")
    )
)]
pub async fn remove_staff(
    user: CurrentUser,
    State(repo): State<RepositoryState>,
    Path(member_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    let bank_id = managed_bank(&user)?;

    let audit = AuditEntry {
        user_id: user.0.id,
        action: "remove_staff".to_string(),
        table_name: Some("blood_bank_staff".to_string()),
        record_id: Some(member_id.to_string()),
        old_values: Some(json!({ "blood_bank_id": bank_id, "user_id": member_id })),
        new_values: None,
    };

    if !repo.remove_staff(bank_id, member_id, audit).await? {
        return Err(AppError::NotFound);
    }

    tracing::info!(%bank_id, %member_id, "staff member removed");
    Ok(StatusCode::NO_CONTENT)
}

// --- Admin ---

#[utoipa::path(
    get,
    path = "/admin/blood-banks",
    responses((status = 200, description = "Page", body = PageView), (status = 403, description = "Missing can_manage_blood_banks"))
)]
pub async fn blood_banks_page(user: CurrentUser) -> Result<Json<PageView>, AppError> {
    gated_page(&user, "admin/blood-banks", Permission::CanManageBloodBanks)
}

#[utoipa::path(
    get,
    path = "/admin/users",
    responses(
        (status = 200, description = "All profiles", body = [ProfileSummary]),
        (status = 403, description = "Missing can_manage_users")
    )
)]
pub async fn list_users(
    user: CurrentUser,
    State(repo): State<RepositoryState>,
) -> Result<Json<Vec<ProfileSummary>>, AppError> {
    user.require(Permission::CanManageUsers)?;
    Ok(Json(repo.list_profiles().await?))
}

async fn find_target(state: &AppState, user_id: Uuid) -> Result<ProfileRecord, AppError> {
    state
        .directory
        .find_profile(user_id)
        .await?
        .ok_or(AppError::NotFound)
}

fn stored_role(record: &ProfileRecord) -> Option<Role> {
    record
        .role
        .as_deref()
        .and_then(|raw| raw.trim().parse::<Role>().ok())
}

/// persist_grant
///
/// Writes the new grant together with its audit entry. A stale revision means
/// another admin changed the same user in the meantime.
async fn persist_grant(
    state: &AppState,
    admin: &CurrentUser,
    user_id: Uuid,
    action: &str,
    before: &RoleGrant,
    after: &RoleGrant,
    diff: &PermissionDiff,
) -> Result<(), AppError> {
    let audit = AuditEntry {
        user_id: admin.0.id,
        action: action.to_string(),
        table_name: Some("users".to_string()),
        record_id: Some(user_id.to_string()),
        old_values: Some(json!({
            "role": before.role(),
            "permissions": before.effective(),
        })),
        new_values: Some(json!({
            "role": after.role(),
            "permissions": after.effective(),
            "diff": diff,
        })),
    };

    if !state.repo.save_role_grant(user_id, after, audit).await? {
        return Err(AppError::Conflict(
            "permissions were changed by someone else, reload and try again".to_string(),
        ));
    }

    tracing::info!(
        admin_id = %admin.0.id,
        %user_id,
        action,
        changes = diff.changes.len(),
        "grant updated"
    );
    Ok(())
}

/// update_user_permissions
///
/// Applies per-user permission changes on top of the user's current grant.
/// Only the listed permissions change.
#[utoipa::path(
    put,
    path = "/admin/users/{id}/permissions",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = PermissionSet,
    responses(
        (status = 200, description = "Grant updated", body = GrantView),
        (status = 400, description = "Target has no valid role"),
        (status = 404, description = "No such user"),
        (status = 409, description = "Concurrent edit")
    )
)]
pub async fn update_user_permissions(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(changes): Json<PermissionSet>,
) -> Result<Json<GrantView>, AppError> {
    user.require(Permission::CanManageUsers)?;

    let record = find_target(&state, user_id).await?;
    let role = stored_role(&record).ok_or_else(|| {
        AppError::BadRequest("user has no valid role, assign one first".to_string())
    })?;
    let stored = PermissionSet::from_stored(record.permissions.as_ref());
    let current = RoleGrant::from_stored(role, &stored, record.permissions_revision);

    let (next, diff) = current.with_changes(&changes);
    if diff.is_empty() {
        tracing::debug!(%user_id, "permission edit changes nothing, not written");
        return Ok(Json(GrantView::new(user_id, &current, diff)));
    }
    persist_grant(&state, &user, user_id, "update_permissions", &current, &next, &diff).await?;

    Ok(Json(GrantView::new(user_id, &next, diff)))
}

/// update_user_role
///
/// Moves the user to another role. Per-user overrides are dropped and the new
/// role's defaults apply.
#[utoipa::path(
    put,
    path = "/admin/users/{id}/role",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = RoleChangeRequest,
    responses(
        (status = 200, description = "Role changed", body = GrantView),
        (status = 404, description = "No such user"),
        (status = 409, description = "Concurrent edit")
    )
)]
pub async fn update_user_role(
    user: CurrentUser,
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<RoleChangeRequest>,
) -> Result<Json<GrantView>, AppError> {
    user.require(Permission::CanManageUsers)?;

    let record = find_target(&state, user_id).await?;
    let stored = PermissionSet::from_stored(record.permissions.as_ref());
    // A user without a valid role holds nothing yet; the stored set is read as-is.
    let existing_role = stored_role(&record);
    let current_role = existing_role.unwrap_or(payload.role);
    let current = RoleGrant::from_stored(current_role, &stored, record.permissions_revision);

    let (next, diff) = current.reassign(payload.role);
    if existing_role == Some(payload.role) && diff.is_empty() {
        tracing::debug!(%user_id, "role change changes nothing, not written");
        return Ok(Json(GrantView::new(user_id, &current, diff)));
    }
    persist_grant(&state, &user, user_id, "update_role", &current, &next, &diff).await?;

    Ok(Json(GrantView::new(user_id, &next, diff)))
}

#[utoipa::path(
    get,
    path = "/admin/audit-logs",
    params(AuditLogQuery),
    responses(
        (status = 200, description = "Newest entries first", body = [AuditLogEntry]),
        (status = 403, description = "Missing can_view_audit_logs")
    )
)]
pub async fn list_audit_logs(
    user: CurrentUser,
    State(repo): State<RepositoryState>,
    Query(query): Query<AuditLogQuery>,
) -> Result<Json<Vec<AuditLogEntry>>, AppError> {
    user.require(Permission::CanViewAuditLogs)?;
    let limit = query
        .limit
        .unwrap_or(DEFAULT_AUDIT_LIMIT)
        .clamp(1, MAX_AUDIT_LIMIT);
    Ok(Json(repo.list_audit_logs(limit).await?))
}

// --- Fallbacks ---

pub async fn not_found() -> AppError {
    AppError::NotFound
}

/// configuration_missing
///
/// Served for every path while the backend settings are missing or invalid.
pub async fn configuration_missing() -> impl IntoResponse {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "page": "setup", "error": "configuration_missing" })),
    )
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    access::Role,
    permissions::{PermissionDiff, PermissionSet, RoleGrant},
};

// --- Database Rows ---

/// ProfileRecord
///
/// Raw `public.users` row as read by the privileged profile directory.
/// `role` and `permissions` are nullable in storage and validated by the session resolver.
#[derive(Debug, Clone, FromRow, Default)]
pub struct ProfileRecord {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Option<String>,
    pub permissions: Option<Value>,
    pub permissions_revision: i32,
}

/// UserProfile
///
/// A fully resolved profile: known role, grant and blood-bank linkage.
/// Placed in request extensions by the interceptor.
#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub grant: RoleGrant,
    pub blood_bank_id: Option<Uuid>,
}

impl UserProfile {
    pub fn from_record(record: ProfileRecord, role: Role, blood_bank_id: Option<Uuid>) -> Self {
        let stored = PermissionSet::from_stored(record.permissions.as_ref());
        let grant = RoleGrant::from_stored(role, &stored, record.permissions_revision);
        Self {
            id: record.id,
            email: record.email,
            full_name: record.full_name,
            grant,
            blood_bank_id,
        }
    }

    pub fn role(&self) -> Role {
        self.grant.role()
    }

    pub fn permissions(&self) -> PermissionSet {
        self.grant.effective()
    }
}

/// ProfileSummary
///
/// One row of the admin user listing.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct ProfileSummary {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    // Kept as text: the listing must show rows with missing or unknown roles too.
    pub role: Option<String>,
    #[ts(type = "string | null")]
    pub created_at: Option<DateTime<Utc>>,
}

/// NewProfile
///
/// Insert payload for the profile mirrored from a fresh auth user.
#[derive(Debug, Clone)]
pub struct NewProfile {
    pub id: Uuid,
    pub email: String,
    pub full_name: String,
    pub phone: Option<String>,
    pub blood_type: Option<String>,
    pub grant: RoleGrant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum StaffRole {
    #[default]
    Staff,
    Manager,
}

impl StaffRole {
    pub fn as_str(self) -> &'static str {
        match self {
            StaffRole::Staff => "staff",
            StaffRole::Manager => "manager",
        }
    }
}

/// StaffMember
///
/// `blood_bank_staff` row joined with the member's contact details.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct StaffMember {
    pub id: Uuid,
    pub user_id: Uuid,
    pub role: String,
    pub full_name: Option<String>,
    pub email: String,
    pub phone: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// AuditEntry
///
/// Insert payload for `audit_logs`.
#[derive(Debug, Clone, Default)]
pub struct AuditEntry {
    pub user_id: Uuid,
    pub action: String,
    pub table_name: Option<String>,
    pub record_id: Option<String>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub table_name: Option<String>,
    pub record_id: Option<String>,
    #[ts(type = "unknown")]
    pub old_values: Option<Value>,
    #[ts(type = "unknown")]
    pub new_values: Option<Value>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

// --- Blood Bank Operations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum DonationStatus {
    Scheduled,
    Completed,
    Cancelled,
}

impl DonationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DonationStatus::Scheduled => "scheduled",
            DonationStatus::Completed => "completed",
            DonationStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum RequestStatus {
    Pending,
    Approved,
    Fulfilled,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Approved => "approved",
            RequestStatus::Fulfilled => "fulfilled",
            RequestStatus::Cancelled => "cancelled",
        }
    }
}

/// BloodType
///
/// ABO group plus Rh factor, spelled the way it is stored (`"AB-"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub enum BloodType {
    #[serde(rename = "A+")]
    APositive,
    #[serde(rename = "A-")]
    ANegative,
    #[serde(rename = "B+")]
    BPositive,
    #[serde(rename = "B-")]
    BNegative,
    #[serde(rename = "AB+")]
    AbPositive,
    #[serde(rename = "AB-")]
    AbNegative,
    #[serde(rename = "O+")]
    OPositive,
    #[serde(rename = "O-")]
    ONegative,
}

impl BloodType {
    pub fn as_str(self) -> &'static str {
        match self {
            BloodType::APositive => "A+",
            BloodType::ANegative => "A-",
            BloodType::BPositive => "B+",
            BloodType::BNegative => "B-",
            BloodType::AbPositive => "AB+",
            BloodType::AbNegative => "AB-",
            BloodType::OPositive => "O+",
            BloodType::ONegative => "O-",
        }
    }
}

/// DonationStatusUpdate
///
/// Completing a donation usually also records when it happened and how much
/// was collected; both are left untouched when absent.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DonationStatusUpdate {
    pub status: DonationStatus,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub actual_date: Option<NaiveDate>,
    #[serde(default)]
    pub units_donated: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RequestStatusUpdate {
    pub status: RequestStatus,
}

/// AddInventoryRequest
///
/// A collected batch. The bank is always the caller's linked one.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct AddInventoryRequest {
    pub blood_type: BloodType,
    pub units_available: i32,
    #[ts(type = "string")]
    pub collection_date: NaiveDate,
    #[ts(type = "string")]
    pub expiry_date: NaiveDate,
    #[serde(default)]
    pub donor_id: Option<Uuid>,
    #[serde(default)]
    pub batch_number: Option<String>,
}

/// NewInventory
///
/// Insert payload for `blood_inventory`. New batches start untested and available.
#[derive(Debug, Clone)]
pub struct NewInventory {
    pub id: Uuid,
    pub blood_bank_id: Uuid,
    pub blood_type: BloodType,
    pub units_available: i32,
    pub collection_date: NaiveDate,
    pub expiry_date: NaiveDate,
    pub donor_id: Option<Uuid>,
    pub batch_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct InventoryCreated {
    pub id: Uuid,
    pub blood_bank_id: Uuid,
}

// --- Request Payloads ---

/// Fields default to empty so a missing one is reported as a 400 by the handler.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(default)]
#[ts(export)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// SignUpRequest
///
/// The password is passed through to the auth provider and never stored here.
/// `role` is kept as text so an unknown value becomes a 400 rather than a
/// deserialization rejection.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[serde(default)]
#[ts(export)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub role: String,
    pub phone: Option<String>,
    pub blood_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RoleChangeRequest {
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AddStaffRequest {
    pub email: String,
    #[serde(default)]
    pub role: StaffRole,
}

// --- Page Schemas (Output) ---

/// PageView
///
/// Description of a rendered page: who is looking and what they may do.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PageView {
    pub page: String,
    pub user_id: Uuid,
    pub role: Role,
    pub home: String,
    pub permissions: PermissionSet,
    pub blood_bank_id: Option<Uuid>,
}

impl PageView {
    pub fn for_user(page: &str, user: &UserProfile) -> Self {
        Self {
            page: page.to_string(),
            user_id: user.id,
            role: user.role(),
            home: user.role().home_route().to_string(),
            permissions: user.permissions(),
            blood_bank_id: user.blood_bank_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DashboardView {
    pub dashboard: Role,
    pub viewer: PageView,
    pub full_name: Option<String>,
    pub quick_links: Vec<String>,
}

/// LandingView
///
/// Public pages (`/`, `/auth/login`). `error` is the display-only tag carried
/// by login redirects.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct LandingView {
    pub page: String,
    pub error: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ProfileView {
    pub id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub role: Role,
    pub permissions: PermissionSet,
    pub blood_bank_id: Option<Uuid>,
}

impl From<&UserProfile> for ProfileView {
    fn from(user: &UserProfile) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            role: user.role(),
            permissions: user.permissions(),
            blood_bank_id: user.blood_bank_id,
        }
    }
}

/// GrantView
///
/// Result of an admin role or permission edit.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct GrantView {
    pub user_id: Uuid,
    pub role: Role,
    pub revision: i32,
    pub permissions: PermissionSet,
    pub overrides: PermissionSet,
    pub diff: PermissionDiff,
}

impl GrantView {
    pub fn new(user_id: Uuid, grant: &RoleGrant, diff: PermissionDiff) -> Self {
        Self {
            user_id,
            role: grant.role(),
            revision: grant.revision(),
            permissions: grant.effective(),
            overrides: PermissionSet(grant.overrides().clone()),
            diff,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

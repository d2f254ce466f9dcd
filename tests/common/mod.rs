#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, Response, header},
};
use blood_portal::{
    AppState, create_router,
    access::Role,
    auth::{Claims, DEV_USER_HEADER},
    config::AppConfig,
    models::{
        AuditEntry, AuditLogEntry, DonationStatusUpdate, NewInventory, NewProfile, ProfileRecord,
        ProfileSummary, RequestStatus, StaffMember, StaffRole,
    },
    permissions::{RoleGrant, default_permissions},
    repository::{DirectoryState, ProfileDirectory, RepoError, Repository, RepositoryState},
    supabase::{AuthProviderState, MockAuthProvider},
};
use chrono::Utc;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::Value;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};
use uuid::Uuid;

// --- In-Memory Backend ---

/// A donation or blood request row: owning bank (if any) and status text.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedRow {
    pub blood_bank_id: Option<Uuid>,
    pub status: String,
}

/// Stands in for both the privileged directory and the repository, so a test
/// can seed profiles and then inspect what the handlers wrote.
///
/// Mutations mirror the transactional contract: when the audit insert fails
/// (`fail_audit`), the change itself is not applied either.
#[derive(Default)]
pub struct InMemoryBackend {
    pub profiles: Mutex<HashMap<Uuid, ProfileRecord>>,
    pub bank_links: Mutex<HashMap<Uuid, Uuid>>,
    pub staff: Mutex<Vec<(Uuid, Uuid, StaffRole)>>,
    pub donations: Mutex<HashMap<Uuid, TrackedRow>>,
    pub blood_requests: Mutex<HashMap<Uuid, TrackedRow>>,
    pub inventory: Mutex<Vec<NewInventory>>,
    pub audit: Mutex<Vec<AuditEntry>>,
    pub last_audit_limit: Mutex<Option<i64>>,
    pub fail_lookups: bool,
    pub fail_profile_insert: bool,
    pub fail_audit: bool,
    /// Every profile read is followed by a concurrent grant edit elsewhere,
    /// so whatever revision the caller saw is already stale.
    pub stale_reads: bool,
}

impl InMemoryBackend {
    pub fn failing_lookups() -> Self {
        Self {
            fail_lookups: true,
            ..Default::default()
        }
    }

    pub fn insert(&self, record: ProfileRecord) -> Uuid {
        let id = record.id;
        self.profiles.lock().unwrap().insert(id, record);
        id
    }

    pub fn link_bank(&self, user_id: Uuid, bank_id: Uuid) {
        self.bank_links.lock().unwrap().insert(user_id, bank_id);
    }

    pub fn profile(&self, user_id: Uuid) -> Option<ProfileRecord> {
        self.profiles.lock().unwrap().get(&user_id).cloned()
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.audit.lock().unwrap().clone()
    }

    pub fn seed_donation(&self, blood_bank_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.donations.lock().unwrap().insert(
            id,
            TrackedRow {
                blood_bank_id,
                status: "scheduled".to_string(),
            },
        );
        id
    }

    pub fn seed_request(&self, blood_bank_id: Option<Uuid>) -> Uuid {
        let id = Uuid::new_v4();
        self.blood_requests.lock().unwrap().insert(
            id,
            TrackedRow {
                blood_bank_id,
                status: "pending".to_string(),
            },
        );
        id
    }

    fn record_audit(&self, entry: AuditEntry) -> Result<(), RepoError> {
        if self.fail_audit {
            return Err(unreachable_backend());
        }
        self.audit.lock().unwrap().push(entry);
        Ok(())
    }
}

fn in_scope(row: &TrackedRow, scope: Option<Uuid>) -> bool {
    scope.is_none_or(|bank| row.blood_bank_id == Some(bank))
}

fn unreachable_backend() -> RepoError {
    RepoError::Database(sqlx::Error::PoolTimedOut)
}

#[async_trait]
impl ProfileDirectory for InMemoryBackend {
    async fn find_profile(&self, user_id: Uuid) -> Result<Option<ProfileRecord>, RepoError> {
        if self.fail_lookups {
            return Err(unreachable_backend());
        }
        let mut profiles = self.profiles.lock().unwrap();
        let found = profiles.get(&user_id).cloned();
        if self.stale_reads {
            if let Some(record) = profiles.get_mut(&user_id) {
                record.permissions_revision += 1;
            }
        }
        Ok(found)
    }

    async fn find_blood_bank_link(&self, user_id: Uuid) -> Result<Option<Uuid>, RepoError> {
        if self.fail_lookups {
            return Err(unreachable_backend());
        }
        Ok(self.bank_links.lock().unwrap().get(&user_id).copied())
    }
}

#[async_trait]
impl Repository for InMemoryBackend {
    async fn create_profile(&self, profile: NewProfile) -> Result<(), RepoError> {
        if self.fail_profile_insert {
            return Err(unreachable_backend());
        }
        self.insert(ProfileRecord {
            id: profile.id,
            email: profile.email,
            full_name: Some(profile.full_name),
            role: Some(profile.grant.role().as_str().to_string()),
            permissions: Some(profile.grant.effective().to_json()),
            permissions_revision: profile.grant.revision(),
        });
        Ok(())
    }

    async fn list_profiles(&self) -> Result<Vec<ProfileSummary>, RepoError> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .values()
            .map(|record| ProfileSummary {
                id: record.id,
                email: record.email.clone(),
                full_name: record.full_name.clone(),
                role: record.role.clone(),
                created_at: None,
            })
            .collect())
    }

    async fn find_user_id_by_email(&self, email: &str) -> Result<Option<Uuid>, RepoError> {
        Ok(self
            .profiles
            .lock()
            .unwrap()
            .values()
            .find(|record| record.email == email)
            .map(|record| record.id))
    }

    async fn save_role_grant(
        &self,
        user_id: Uuid,
        grant: &RoleGrant,
        audit: AuditEntry,
    ) -> Result<bool, RepoError> {
        let mut profiles = self.profiles.lock().unwrap();
        match profiles.get_mut(&user_id) {
            Some(record) if record.permissions_revision == grant.revision() - 1 => {
                self.record_audit(audit)?;
                record.role = Some(grant.role().as_str().to_string());
                record.permissions = Some(grant.effective().to_json());
                record.permissions_revision = grant.revision();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_staff(&self, blood_bank_id: Uuid) -> Result<Vec<StaffMember>, RepoError> {
        let staff = self.staff.lock().unwrap().clone();
        Ok(staff
            .into_iter()
            .filter(|(bank, _, _)| *bank == blood_bank_id)
            .map(|(_, user_id, role)| {
                let record = self.profile(user_id).unwrap_or_default();
                StaffMember {
                    id: Uuid::new_v4(),
                    user_id,
                    role: role.as_str().to_string(),
                    full_name: record.full_name,
                    email: record.email,
                    phone: None,
                    created_at: Utc::now(),
                }
            })
            .collect())
    }

    async fn add_staff(
        &self,
        blood_bank_id: Uuid,
        user_id: Uuid,
        role: StaffRole,
        audit: AuditEntry,
    ) -> Result<bool, RepoError> {
        let mut staff = self.staff.lock().unwrap();
        if staff
            .iter()
            .any(|(bank, user, _)| *bank == blood_bank_id && *user == user_id)
        {
            return Ok(false);
        }
        self.record_audit(audit)?;
        staff.push((blood_bank_id, user_id, role));
        Ok(true)
    }

    async fn remove_staff(
        &self,
        blood_bank_id: Uuid,
        user_id: Uuid,
        audit: AuditEntry,
    ) -> Result<bool, RepoError> {
        let mut staff = self.staff.lock().unwrap();
        let Some(position) = staff
            .iter()
            .position(|(bank, user, _)| *bank == blood_bank_id && *user == user_id)
        else {
            return Ok(false);
        };
        self.record_audit(audit)?;
        staff.remove(position);
        Ok(true)
    }

    async fn update_donation_status(
        &self,
        donation_id: Uuid,
        update: &DonationStatusUpdate,
        scope: Option<Uuid>,
        audit: AuditEntry,
    ) -> Result<bool, RepoError> {
        let mut donations = self.donations.lock().unwrap();
        match donations.get_mut(&donation_id) {
            Some(row) if in_scope(row, scope) => {
                self.record_audit(audit)?;
                row.status = update.status.as_str().to_string();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_request_status(
        &self,
        request_id: Uuid,
        status: RequestStatus,
        scope: Option<Uuid>,
        audit: AuditEntry,
    ) -> Result<bool, RepoError> {
        let mut requests = self.blood_requests.lock().unwrap();
        match requests.get_mut(&request_id) {
            Some(row) if row.blood_bank_id.is_none() || in_scope(row, scope) => {
                self.record_audit(audit)?;
                row.status = status.as_str().to_string();
                if scope.is_some() {
                    row.blood_bank_id = scope;
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn add_inventory(&self, batch: &NewInventory, audit: AuditEntry) -> Result<(), RepoError> {
        self.record_audit(audit)?;
        self.inventory.lock().unwrap().push(batch.clone());
        Ok(())
    }

    async fn list_audit_logs(&self, limit: i64) -> Result<Vec<AuditLogEntry>, RepoError> {
        *self.last_audit_limit.lock().unwrap() = Some(limit);
        Ok(self
            .audit
            .lock()
            .unwrap()
            .iter()
            .rev()
            .take(limit as usize)
            .map(|entry| AuditLogEntry {
                id: Uuid::new_v4(),
                user_id: Some(entry.user_id),
                action: entry.action.clone(),
                table_name: entry.table_name.clone(),
                record_id: entry.record_id.clone(),
                old_values: entry.old_values.clone(),
                new_values: entry.new_values.clone(),
                created_at: Utc::now(),
            })
            .collect())
    }
}

// --- Fixtures ---

/// A stored profile with the role's default permissions.
pub fn profile_with_role(role: Role) -> ProfileRecord {
    let id = Uuid::new_v4();
    ProfileRecord {
        id,
        email: format!("{}-{}@example.com", role.as_str(), id.simple()),
        full_name: Some(format!("Test {}", role)),
        role: Some(role.as_str().to_string()),
        permissions: Some(default_permissions(role).to_json()),
        permissions_revision: 0,
    }
}

/// A stored profile with arbitrary (possibly invalid) role text.
pub fn profile_with_raw_role(role: Option<&str>) -> ProfileRecord {
    ProfileRecord {
        id: Uuid::new_v4(),
        email: "raw@example.com".to_string(),
        role: role.map(str::to_string),
        ..Default::default()
    }
}

pub fn token_for(user_id: Uuid, secret: &str, audience: &str, expires_in_secs: i64) -> String {
    let now = Utc::now().timestamp();
    let claims = Claims {
        sub: user_id,
        email: Some("someone@example.com".to_string()),
        aud: audience.to_string(),
        exp: (now + expires_in_secs) as usize,
        iat: now as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("token encodes")
}

// --- App Helpers ---

pub fn build_app(backend: Arc<InMemoryBackend>, auth: MockAuthProvider) -> Router {
    build_app_with_config(backend, auth, AppConfig::default())
}

pub fn build_app_with_config(
    backend: Arc<InMemoryBackend>,
    auth: MockAuthProvider,
    config: AppConfig,
) -> Router {
    let repo: RepositoryState = backend.clone();
    let directory: DirectoryState = backend;
    let auth: AuthProviderState = Arc::new(auth);
    create_router(AppState {
        repo,
        directory,
        auth,
        config,
    })
}

/// Request identified through the local-environment header.
pub fn request_as(method: Method, uri: &str, user_id: Option<Uuid>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(id) = user_id {
        builder = builder.header(DEV_USER_HEADER, id.to_string());
    }
    match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub fn location(response: &Response<Body>) -> Option<String> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect()
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

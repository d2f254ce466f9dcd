use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::{collections::BTreeMap, fmt, str::FromStr};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::access::Role;

/// Permission
///
/// Fine-grained, per-user switches. The serialized names are the keys of the
/// `users.permissions` JSON column.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Permission {
    CanManageUsers,
    CanManageBloodBanks,
    CanViewAuditLogs,
    CanGenerateReports,
    CanApproveRequests,
    CanManageInventory,
    CanManageDonations,
    CanManageRequests,
    CanManageStaff,
    CanViewAnalytics,
    CanScheduleDonations,
    CanViewDonationHistory,
    CanCreateRequests,
    CanViewRequests,
    CanUpdateProfile,
}

impl Permission {
    pub const ALL: [Permission; 15] = [
        Permission::CanManageUsers,
        Permission::CanManageBloodBanks,
        Permission::CanViewAuditLogs,
        Permission::CanGenerateReports,
        Permission::CanApproveRequests,
        Permission::CanManageInventory,
        Permission::CanManageDonations,
        Permission::CanManageRequests,
        Permission::CanManageStaff,
        Permission::CanViewAnalytics,
        Permission::CanScheduleDonations,
        Permission::CanViewDonationHistory,
        Permission::CanCreateRequests,
        Permission::CanViewRequests,
        Permission::CanUpdateProfile,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Permission::CanManageUsers => "can_manage_users",
            Permission::CanManageBloodBanks => "can_manage_blood_banks",
            Permission::CanViewAuditLogs => "can_view_audit_logs",
            Permission::CanGenerateReports => "can_generate_reports",
            Permission::CanApproveRequests => "can_approve_requests",
            Permission::CanManageInventory => "can_manage_inventory",
            Permission::CanManageDonations => "can_manage_donations",
            Permission::CanManageRequests => "can_manage_requests",
            Permission::CanManageStaff => "can_manage_staff",
            Permission::CanViewAnalytics => "can_view_analytics",
            Permission::CanScheduleDonations => "can_schedule_donations",
            Permission::CanViewDonationHistory => "can_view_donation_history",
            Permission::CanCreateRequests => "can_create_requests",
            Permission::CanViewRequests => "can_view_requests",
            Permission::CanUpdateProfile => "can_update_profile",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .into_iter()
            .find(|p| p.as_str() == raw)
            .ok_or_else(|| format!("unknown permission `{raw}`"))
    }
}

/// PermissionSet
///
/// Named booleans. A missing entry and an explicit `false` both mean "not granted".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(transparent)]
#[ts(export)]
pub struct PermissionSet(pub BTreeMap<Permission, bool>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn granting(permissions: &[Permission]) -> Self {
        Self(permissions.iter().map(|p| (*p, true)).collect())
    }

    pub fn with(mut self, permission: Permission, value: bool) -> Self {
        self.0.insert(permission, value);
        self
    }

    pub fn set(&mut self, permission: Permission, value: bool) {
        self.0.insert(permission, value);
    }

    pub fn get(&self, permission: Permission) -> Option<bool> {
        self.0.get(&permission).copied()
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.get(permission) == Some(true)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Permission, bool)> + '_ {
        self.0.iter().map(|(p, v)| (*p, *v))
    }

    /// from_stored
    ///
    /// Reads the JSON column leniently: unknown keys and non-boolean values are
    /// skipped with a warning instead of failing the whole profile lookup.
    pub fn from_stored(value: Option<&Value>) -> Self {
        let Some(Value::Object(entries)) = value else {
            return Self::default();
        };
        let mut set = Self::default();
        for (key, raw) in entries {
            match (key.parse::<Permission>(), raw.as_bool()) {
                (Ok(permission), Some(flag)) => set.set(permission, flag),
                _ => tracing::warn!(key = %key, "ignoring unrecognised stored permission entry"),
            }
        }
        set
    }

    pub fn to_json(&self) -> Value {
        let map: Map<String, Value> = self
            .iter()
            .map(|(p, v)| (p.as_str().to_string(), Value::Bool(v)))
            .collect();
        Value::Object(map)
    }
}

/// default_permissions
///
/// The permission set a role receives at sign-up.
pub fn default_permissions(role: Role) -> PermissionSet {
    use Permission::*;
    match role {
        Role::Admin => PermissionSet::granting(&[
            CanManageUsers,
            CanManageBloodBanks,
            CanViewAuditLogs,
            CanGenerateReports,
            CanApproveRequests,
        ]),
        Role::BloodBank => PermissionSet::granting(&[
            CanManageInventory,
            CanManageDonations,
            CanManageRequests,
            CanManageStaff,
            CanViewAnalytics,
            CanUpdateProfile,
        ]),
        Role::Donor => PermissionSet::granting(&[
            CanScheduleDonations,
            CanViewDonationHistory,
            CanUpdateProfile,
        ]),
        Role::Recipient => {
            PermissionSet::granting(&[CanCreateRequests, CanViewRequests, CanUpdateProfile])
        }
    }
}

/// True only for an explicit grant.
pub fn has_permission(set: Option<&PermissionSet>, permission: Permission) -> bool {
    set.is_some_and(|s| s.grants(permission))
}

/// PermissionChange
///
/// One line of an auditable diff. `None` means the permission was absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PermissionChange {
    pub permission: Permission,
    pub before: Option<bool>,
    pub after: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct PermissionDiff {
    pub changes: Vec<PermissionChange>,
}

impl PermissionDiff {
    pub fn between(before: &PermissionSet, after: &PermissionSet) -> Self {
        let changes = Permission::ALL
            .into_iter()
            .filter_map(|permission| {
                let (b, a) = (before.get(permission), after.get(permission));
                (b.unwrap_or(false) != a.unwrap_or(false)).then_some(PermissionChange {
                    permission,
                    before: b,
                    after: a,
                })
            })
            .collect();
        Self { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// RoleGrant
///
/// A role together with its explicit deviations from that role's defaults.
/// The effective permission set is always derived, never stored independently,
/// so it cannot drift from the role. Only the constructors below produce one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleGrant {
    role: Role,
    overrides: BTreeMap<Permission, bool>,
    revision: i32,
}

impl RoleGrant {
    /// Fresh grant at sign-up: role defaults, no overrides.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            overrides: BTreeMap::new(),
            revision: 0,
        }
    }

    /// from_stored
    ///
    /// Rebuilds a grant from the persisted effective set, keeping as overrides
    /// only the entries that disagree with the role defaults.
    pub fn from_stored(role: Role, stored: &PermissionSet, revision: i32) -> Self {
        let defaults = default_permissions(role);
        let overrides = Permission::ALL
            .into_iter()
            .filter_map(|p| {
                let stored_value = stored.grants(p);
                (stored_value != defaults.grants(p)).then_some((p, stored_value))
            })
            .collect();
        Self {
            role,
            overrides,
            revision,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn revision(&self) -> i32 {
        self.revision
    }

    pub fn overrides(&self) -> &BTreeMap<Permission, bool> {
        &self.overrides
    }

    pub fn effective(&self) -> PermissionSet {
        let mut set = default_permissions(self.role);
        for (permission, value) in &self.overrides {
            set.set(*permission, *value);
        }
        set
    }

    pub fn grants(&self, permission: Permission) -> bool {
        self.effective().grants(permission)
    }

    /// with_changes
    ///
    /// Applies explicit per-user changes on top of the current effective set.
    pub fn with_changes(&self, changes: &PermissionSet) -> (RoleGrant, PermissionDiff) {
        let before = self.effective();
        let mut after = before.clone();
        for (permission, value) in changes.iter() {
            after.set(permission, value);
        }
        let next = RoleGrant::from_stored(self.role, &after, self.revision + 1);
        let diff = PermissionDiff::between(&before, &next.effective());
        (next, diff)
    }

    /// reassign
    ///
    /// Moves the user to another role. Overrides are dropped: the new role
    /// starts from its own defaults.
    pub fn reassign(&self, role: Role) -> (RoleGrant, PermissionDiff) {
        let before = self.effective();
        let next = RoleGrant {
            role,
            overrides: BTreeMap::new(),
            revision: self.revision + 1,
        };
        let diff = PermissionDiff::between(&before, &next.effective());
        (next, diff)
    }
}

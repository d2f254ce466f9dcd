use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use ts_rs::TS;
use utoipa::ToSchema;

/// Landing page for anyone without a usable session.
pub const LOGIN_PATH: &str = "/auth/login";
/// Sign-out endpoint. Authenticated users must be able to reach it.
pub const LOGOUT_PATH: &str = "/auth/logout";
/// Generic dashboard entry point, always resolved to a role-specific sub-path.
pub const DASHBOARD_PATH: &str = "/dashboard";
pub const ROOT_PATH: &str = "/";

/// Role
///
/// The primary axis of access control. Stored as snake_case text in `users.role`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS, ToSchema,
)]
#[serde(rename_all = "snake_case")]
#[ts(export)]
pub enum Role {
    Donor,
    Recipient,
    BloodBank,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Donor, Role::Recipient, Role::BloodBank, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Donor => "donor",
            Role::Recipient => "recipient",
            Role::BloodBank => "blood_bank",
            Role::Admin => "admin",
        }
    }

    /// The path segment used under `/dashboard/`.
    pub fn dashboard_segment(self) -> &'static str {
        match self {
            Role::Donor => "donor",
            Role::Recipient => "recipient",
            Role::BloodBank => "blood-bank",
            Role::Admin => "admin",
        }
    }

    pub fn from_dashboard_segment(segment: &str) -> Option<Role> {
        Role::ALL
            .into_iter()
            .find(|role| role.dashboard_segment() == segment)
    }

    /// home_route
    ///
    /// The fixed landing route of the role.
    pub fn home_route(self) -> &'static str {
        match self {
            Role::Donor => "/dashboard/donor",
            Role::Recipient => "/dashboard/recipient",
            Role::BloodBank => "/dashboard/blood-bank",
            Role::Admin => "/dashboard/admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role `{0}`")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == raw)
            .ok_or_else(|| UnknownRole(raw.to_string()))
    }
}

/// route_by_role
///
/// Total over any stored role value: the four roles map to their dashboards,
/// anything else falls back to the login page.
pub fn route_by_role(raw: &str) -> &'static str {
    raw.parse::<Role>()
        .map(Role::home_route)
        .unwrap_or(LOGIN_PATH)
}

// --- Route Classification ---

/// Zone
///
/// The access class of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zone {
    /// Reachable without a session (landing page, auth pages).
    Public,
    /// Any authenticated role.
    General,
    /// Only the named role (and admin).
    Exclusive(Role),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Exact(&'static str),
    /// Segment-aware prefix: `/admin` matches `/admin` and `/admin/users`
    /// but not `/administrator`.
    Prefix(&'static str),
}

impl Pattern {
    pub fn text(self) -> &'static str {
        match self {
            Pattern::Exact(p) | Pattern::Prefix(p) => p,
        }
    }

    pub fn matches(self, path: &str) -> bool {
        match self {
            Pattern::Exact(p) => path == p,
            Pattern::Prefix(p) => match path.strip_prefix(p) {
                Some(rest) => rest.is_empty() || rest.starts_with('/'),
                None => false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RouteRule {
    pub pattern: Pattern,
    pub zone: Zone,
}

const fn rule(pattern: Pattern, zone: Zone) -> RouteRule {
    RouteRule { pattern, zone }
}

/// First match wins. Exclusive rules come before the general ones so that
/// `/dashboard/admin` is never swallowed by `/dashboard`.
pub const ROUTE_TABLE: &[RouteRule] = &[
    rule(Pattern::Prefix("/admin"), Zone::Exclusive(Role::Admin)),
    rule(Pattern::Prefix("/dashboard/admin"), Zone::Exclusive(Role::Admin)),
    rule(Pattern::Prefix("/blood-bank"), Zone::Exclusive(Role::BloodBank)),
    rule(Pattern::Prefix("/dashboard/blood-bank"), Zone::Exclusive(Role::BloodBank)),
    rule(Pattern::Prefix("/donations/schedule"), Zone::Exclusive(Role::Donor)),
    rule(Pattern::Prefix("/donations/history"), Zone::Exclusive(Role::Donor)),
    rule(Pattern::Prefix("/dashboard/donor"), Zone::Exclusive(Role::Donor)),
    rule(Pattern::Prefix("/blood-requests/new"), Zone::Exclusive(Role::Recipient)),
    rule(Pattern::Prefix("/blood-requests/history"), Zone::Exclusive(Role::Recipient)),
    rule(Pattern::Prefix("/dashboard/recipient"), Zone::Exclusive(Role::Recipient)),
    rule(Pattern::Prefix("/profile"), Zone::General),
    rule(Pattern::Prefix("/settings"), Zone::General),
    rule(Pattern::Prefix("/notifications"), Zone::General),
    rule(Pattern::Prefix("/community"), Zone::General),
    rule(Pattern::Prefix("/donations"), Zone::General),
    rule(Pattern::Prefix("/dashboard"), Zone::General),
    rule(Pattern::Exact("/"), Zone::Public),
    rule(Pattern::Prefix("/auth"), Zone::Public),
];

/// classify
///
/// Looks the path up in `ROUTE_TABLE`. `None` means the path is unclassified.
pub fn classify(path: &str) -> Option<Zone> {
    ROUTE_TABLE
        .iter()
        .find(|rule| rule.pattern.matches(path))
        .map(|rule| rule.zone)
}

pub fn is_public(path: &str) -> bool {
    classify(path) == Some(Zone::Public)
}

pub fn is_auth_page(path: &str) -> bool {
    Pattern::Prefix("/auth").matches(path)
}

/// Paths listed as the role's own exclusive area, in table order.
pub fn exclusive_prefixes(role: Role) -> Vec<&'static str> {
    ROUTE_TABLE
        .iter()
        .filter(|rule| rule.zone == Zone::Exclusive(role))
        .map(|rule| rule.pattern.text())
        .collect()
}

pub fn general_prefixes() -> Vec<&'static str> {
    ROUTE_TABLE
        .iter()
        .filter(|rule| rule.zone == Zone::General)
        .map(|rule| rule.pattern.text())
        .collect()
}

// --- Route Guard ---

/// What happens to a path no rule classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnmatchedRoutes {
    #[default]
    Allow,
    Deny,
}

impl FromStr for UnmatchedRoutes {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "deny" => Ok(UnmatchedRoutes::Deny),
            "allow" => Ok(UnmatchedRoutes::Allow),
            other => Err(format!("expected `allow` or `deny`, got `{other}`")),
        }
    }
}

/// Principal
///
/// Who is asking. Guests only ever see the public zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Guest,
    Member(Role),
}

/// AccessPolicy
///
/// The route guard. Stateless; evaluating it never mutates anything, so the
/// same inputs always produce the same answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessPolicy {
    pub unmatched: UnmatchedRoutes,
}

impl AccessPolicy {
    pub fn new(unmatched: UnmatchedRoutes) -> Self {
        Self { unmatched }
    }

    /// can_access
    ///
    /// Evaluation order:
    /// 1. another role's exclusive zone denies everyone but that role and admin;
    /// 2. general and public zones allow every role;
    /// 3. admin is allowed everywhere;
    /// 4. unclassified paths follow `self.unmatched`.
    pub fn can_access(&self, role: Role, path: &str) -> bool {
        match classify(path) {
            Some(Zone::Exclusive(owner)) => role == owner || role == Role::Admin,
            Some(Zone::General) | Some(Zone::Public) => true,
            None if role == Role::Admin => true,
            None => self.unmatched == UnmatchedRoutes::Allow,
        }
    }

    pub fn permits(&self, principal: Principal, path: &str) -> bool {
        match principal {
            Principal::Guest => is_public(path),
            Principal::Member(role) => self.can_access(role, path),
        }
    }
}

/// Guard with the default (allow-unmatched) policy.
pub fn can_access(role: Role, path: &str) -> bool {
    AccessPolicy::default().can_access(role, path)
}

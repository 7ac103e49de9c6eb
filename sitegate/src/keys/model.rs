//! API key records and the permission lattice.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Capability granted to an API key.
///
/// `Admin` sits above the other three; `Read`, `Write` and `Delete` are
/// unrelated to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
    Delete,
    Admin,
}

impl Permission {
    /// Whether holding `self` satisfies a requirement for `required`.
    pub fn implies(self, required: Permission) -> bool {
        self == required || self == Permission::Admin
    }
}

/// Set of permissions held by a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn new(permissions: impl IntoIterator<Item = Permission>) -> Self {
        Self(permissions.into_iter().collect())
    }

    /// True if any held permission implies `required`.
    pub fn allows(&self, required: Permission) -> bool {
        self.0.iter().any(|held| held.implies(required))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.0.iter()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// A persisted programmatic credential for one organization.
///
/// Only the SHA-256 digest of the key is stored; the plaintext is handed to
/// the creator once and never again.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub organization_id: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub permissions: PermissionSet,
    /// Empty means every site in the organization.
    pub allowed_site_ids: Vec<String>,
    /// Requests allowed per one-hour window.
    pub rate_limit: u32,
    pub requests_this_window: u32,
    pub window_reset_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub last_used_ip: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// Outcome of one atomic quota consumption against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaDecision {
    /// Request admitted; `count` is the window counter after this request.
    Allowed { count: u32, reset_at: DateTime<Utc> },
    /// Window already at the limit; nothing was incremented.
    Exceeded { reset_at: DateTime<Utc> },
}

/// Identity resolved from a valid bearer credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    pub key_id: String,
    pub organization_id: String,
    pub permissions: PermissionSet,
    pub allowed_site_ids: Vec<String>,
}

impl AuthContext {
    /// Whether a key scoped to `site_ids` stays inside this caller's scope.
    ///
    /// An unrestricted caller covers any scope. A restricted caller covers
    /// only a non-empty subset of its own allow-list, since an empty list
    /// means unrestricted.
    pub fn covers_scope(&self, site_ids: &[String]) -> bool {
        if self.allowed_site_ids.is_empty() {
            return true;
        }
        !site_ids.is_empty() && site_ids.iter().all(|s| self.allowed_site_ids.contains(s))
    }
}

/// Whether `auth` holds `permission`, directly or through `admin`.
pub fn has_permission(auth: &AuthContext, permission: Permission) -> bool {
    auth.permissions.allows(permission)
}

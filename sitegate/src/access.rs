//! Site-level access checks for authenticated callers.

use std::sync::Arc;

use tracing::warn;

use crate::error::{AccessDenied, StoreError};
use crate::keys::AuthContext;
use crate::store::SiteDirectory;

/// Verdict of a site access check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SiteAccess {
    Granted,
    Denied(AccessDenied),
}

impl SiteAccess {
    pub fn is_valid(&self) -> bool {
        matches!(self, SiteAccess::Granted)
    }

    pub fn error(&self) -> Option<&AccessDenied> {
        match self {
            SiteAccess::Granted => None,
            SiteAccess::Denied(denied) => Some(denied),
        }
    }
}

/// Confirms that a resolved caller may act on a given site.
#[derive(Clone)]
pub struct AccessValidator {
    sites: Arc<dyn SiteDirectory>,
}

impl AccessValidator {
    pub fn new(sites: Arc<dyn SiteDirectory>) -> Self {
        Self { sites }
    }

    /// Check the key's allow-list, then site existence and ownership.
    ///
    /// The allow-list is consulted first because it needs no storage round
    /// trip. A listed site still has to belong to the caller's organization.
    pub async fn validate_site_access(
        &self,
        auth: &AuthContext,
        site_id: &str,
    ) -> Result<SiteAccess, StoreError> {
        let denial = if !auth.allowed_site_ids.is_empty()
            && !auth.allowed_site_ids.iter().any(|s| s == site_id)
        {
            Some(AccessDenied::NotAllowed(site_id.to_string()))
        } else {
            match self.sites.site_owner(site_id).await? {
                None => Some(AccessDenied::SiteNotFound(site_id.to_string())),
                Some(owner) if owner != auth.organization_id => {
                    Some(AccessDenied::WrongOrganization(site_id.to_string()))
                }
                Some(_) => None,
            }
        };

        match denial {
            Some(denied) => {
                warn!(
                    key_id = %auth.key_id,
                    organization_id = %auth.organization_id,
                    site_id = %site_id,
                    reason = denied.reason(),
                    "site_access_denied"
                );
                Ok(SiteAccess::Denied(denied))
            }
            None => Ok(SiteAccess::Granted),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{Permission, PermissionSet};
    use crate::store::MemoryStore;

    fn auth(org: &str, allowed: &[&str]) -> AuthContext {
        AuthContext {
            key_id: "key-1".to_string(),
            organization_id: org.to_string(),
            permissions: PermissionSet::new([Permission::Read]),
            allowed_site_ids: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    async fn validator() -> AccessValidator {
        let store = Arc::new(MemoryStore::new());
        store.register_site("site-a", "org-1").await.unwrap();
        store.register_site("site-b", "org-1").await.unwrap();
        store.register_site("site-x", "org-2").await.unwrap();
        AccessValidator::new(store)
    }

    #[tokio::test]
    async fn test_unrestricted_key_owns_site() {
        let v = validator().await;
        let result = v
            .validate_site_access(&auth("org-1", &[]), "site-a")
            .await
            .unwrap();
        assert!(result.is_valid());
        assert_eq!(result.error(), None);
    }

    #[tokio::test]
    async fn test_allow_list_excludes_own_site() {
        let v = validator().await;
        let result = v
            .validate_site_access(&auth("org-1", &["site-a"]), "site-b")
            .await
            .unwrap();
        assert!(!result.is_valid());
        assert_eq!(result, SiteAccess::Denied(AccessDenied::NotAllowed("site-b".to_string())));
    }

    #[tokio::test]
    async fn test_listed_site_of_other_organization_denied() {
        let v = validator().await;
        let result = v
            .validate_site_access(&auth("org-1", &["site-x"]), "site-x")
            .await
            .unwrap();
        assert_eq!(
            result.error(),
            Some(&AccessDenied::WrongOrganization("site-x".to_string()))
        );
    }

    #[tokio::test]
    async fn test_missing_site_denied() {
        let v = validator().await;
        let result = v
            .validate_site_access(&auth("org-1", &[]), "site-zzz")
            .await
            .unwrap();
        assert_eq!(
            result,
            SiteAccess::Denied(AccessDenied::SiteNotFound("site-zzz".to_string()))
        );
    }

    #[tokio::test]
    async fn test_cross_tenant_and_missing_share_public_code() {
        let v = validator().await;
        let other = v.validate_site_access(&auth("org-1", &[]), "site-x").await.unwrap();
        let missing = v.validate_site_access(&auth("org-1", &[]), "nope").await.unwrap();
        assert_eq!(
            other.error().map(AccessDenied::code),
            missing.error().map(AccessDenied::code)
        );
        assert!(other.error().is_some());
    }
}

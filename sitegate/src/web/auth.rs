//! Bearer authentication for API routes.

use std::net::SocketAddr;

use axum::{
    async_trait,
    extract::{ConnectInfo, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use tracing::warn;

use crate::access::SiteAccess;
use crate::keys::{has_permission, AuthContext, Permission};
use crate::web::error::ApiError;
use crate::web::AppState;

/// An authenticated caller. Extracting it consumes one unit of the key's quota.
#[derive(Debug, Clone)]
pub struct Caller(pub AuthContext);

#[async_trait]
impl FromRequestParts<AppState> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok());

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());
        let client_ip = client_ip(&parts.headers, peer, state.config.trust_forwarded_for);

        let auth = state
            .authenticator
            .authenticate(header, client_ip.as_deref())
            .await?;

        Ok(Caller(auth))
    }
}

impl Caller {
    /// Fail with `INSUFFICIENT_PERMISSION` unless the key holds `permission`.
    pub fn require(&self, permission: Permission) -> Result<(), ApiError> {
        if has_permission(&self.0, permission) {
            Ok(())
        } else {
            warn!(
                key_id = %self.0.key_id,
                required = ?permission,
                "permission_denied"
            );
            Err(ApiError::MissingPermission(permission))
        }
    }

    /// Check `permission`, then site access.
    pub async fn authorize_site(
        &self,
        state: &AppState,
        site_id: &str,
        permission: Permission,
    ) -> Result<(), ApiError> {
        self.require(permission)?;
        match state.access.validate_site_access(&self.0, site_id).await? {
            SiteAccess::Granted => Ok(()),
            SiteAccess::Denied(denied) => Err(denied.into()),
        }
    }
}

/// Address recorded as the key's last user.
///
/// `X-Forwarded-For` is client-controlled unless a proxy rewrites it, so it
/// is read only when the deployment says one does.
fn client_ip(headers: &HeaderMap, peer: Option<String>, trust_forwarded_for: bool) -> Option<String> {
    if trust_forwarded_for {
        forwarded_for(headers).or(peer)
    } else {
        peer
    }
}

/// First hop of `X-Forwarded-For`, if present.
fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

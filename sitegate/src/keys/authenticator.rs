//! Bearer credential validation and per-key hourly quota.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{AuthError, StoreError, ValidationError};
use crate::keys::generate::{generate_api_key, hash_api_key};
use crate::keys::model::{ApiKey, AuthContext, PermissionSet, QuotaDecision};
use crate::store::KeyStore;

/// Length of the fixed quota window.
pub const QUOTA_WINDOW_SECS: i64 = 3600;

/// Request to mint a key for an organization.
#[derive(Debug, Clone, Deserialize)]
pub struct NewApiKey {
    pub permissions: PermissionSet,
    #[serde(default)]
    pub allowed_site_ids: Vec<String>,
    /// Requests per hour; falls back to the configured default.
    #[serde(default)]
    pub rate_limit: Option<u32>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl NewApiKey {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.permissions.is_empty() {
            return Err(ValidationError::NoPermissions);
        }
        Ok(())
    }
}

/// A freshly issued key. The only place the plaintext ever appears.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedKey {
    pub id: String,
    pub organization_id: String,
    pub key: String,
    pub key_prefix: String,
    pub permissions: PermissionSet,
    pub allowed_site_ids: Vec<String>,
    pub rate_limit: u32,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Resolves bearer tokens into an [`AuthContext`].
#[derive(Clone)]
pub struct Authenticator {
    keys: Arc<dyn KeyStore>,
    min_token_length: usize,
    default_rate_limit: u32,
}

impl Authenticator {
    pub fn new(keys: Arc<dyn KeyStore>, min_token_length: usize, default_rate_limit: u32) -> Self {
        Self {
            keys,
            min_token_length,
            default_rate_limit,
        }
    }

    /// Authenticate a raw `Authorization` header value.
    pub async fn authenticate(
        &self,
        header: Option<&str>,
        client_ip: Option<&str>,
    ) -> Result<AuthContext, AuthError> {
        self.authenticate_at(header, client_ip, Utc::now()).await
    }

    /// Authenticate as of `now`.
    ///
    /// Checks run cheapest first: header shape, token length, digest lookup,
    /// expiry, then the quota. Usage tracking happens last and can never
    /// fail the request.
    pub async fn authenticate_at(
        &self,
        header: Option<&str>,
        client_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<AuthContext, AuthError> {
        let token = extract_bearer(header)?;

        if token.len() < self.min_token_length {
            warn!(
                token_length = token.len(),
                min_length = self.min_token_length,
                "auth_token_too_short"
            );
            return Err(AuthError::InvalidKeyFormat);
        }

        let key = match self.keys.find_active_by_hash(&hash_api_key(token)).await? {
            Some(key) => key,
            None => {
                warn!("auth_invalid_key");
                return Err(AuthError::InvalidKey);
            }
        };

        if key.is_expired(now) {
            warn!(key_id = %key.id, key_prefix = %key.key_prefix, "auth_key_expired");
            return Err(AuthError::KeyExpired);
        }

        let window = Duration::seconds(QUOTA_WINDOW_SECS);
        match self.keys.consume_quota(&key.id, now, window).await? {
            QuotaDecision::Allowed { count, reset_at } => {
                tracing::debug!(
                    key_id = %key.id,
                    requests_this_window = count,
                    rate_limit = key.rate_limit,
                    window_reset_at = %reset_at,
                    "auth_quota_consumed"
                );
            }
            QuotaDecision::Exceeded { reset_at } => {
                warn!(
                    key_id = %key.id,
                    key_prefix = %key.key_prefix,
                    rate_limit = key.rate_limit,
                    reset_at = %reset_at,
                    "auth_rate_limited"
                );
                return Err(AuthError::RateLimitExceeded { reset_at });
            }
        }

        if let Err(e) = self.keys.record_usage(&key.id, now, client_ip).await {
            warn!(key_id = %key.id, error = %e, "auth_usage_record_failed");
        }

        Ok(AuthContext {
            key_id: key.id,
            organization_id: key.organization_id,
            permissions: key.permissions,
            allowed_site_ids: key.allowed_site_ids,
        })
    }

    /// Mint and persist a key for `organization_id`.
    ///
    /// Only the digest and prefix are stored; the returned plaintext is not
    /// recoverable afterwards.
    pub async fn issue_key(
        &self,
        organization_id: &str,
        request: NewApiKey,
    ) -> Result<IssuedKey, StoreError> {
        let generated = generate_api_key();
        let rate_limit = request.rate_limit.unwrap_or(self.default_rate_limit);

        let record = ApiKey {
            id: Uuid::new_v4().to_string(),
            organization_id: organization_id.to_string(),
            key_hash: generated.key_hash,
            key_prefix: generated.key_prefix.clone(),
            permissions: request.permissions.clone(),
            allowed_site_ids: request.allowed_site_ids.clone(),
            rate_limit,
            requests_this_window: 0,
            window_reset_at: None,
            is_active: true,
            expires_at: request.expires_at,
            last_used_at: None,
            last_used_ip: None,
            created_at: Utc::now(),
        };
        let id = record.id.clone();
        self.keys.insert_key(record).await?;

        info!(
            key_id = %id,
            organization_id = %organization_id,
            key_prefix = %generated.key_prefix,
            rate_limit = rate_limit,
            "api_key_issued"
        );

        Ok(IssuedKey {
            id,
            organization_id: organization_id.to_string(),
            key: generated.plaintext,
            key_prefix: generated.key_prefix,
            permissions: request.permissions,
            allowed_site_ids: request.allowed_site_ids,
            rate_limit,
            expires_at: request.expires_at,
        })
    }

    /// Deactivate `key_id` on behalf of `revoker`.
    ///
    /// Keys of other organizations report `NotFound`, so revocation cannot be
    /// used to discover them. A site-restricted revoker may only revoke keys
    /// whose own scope sits inside its allow-list.
    pub async fn revoke_key(
        &self,
        revoker: &AuthContext,
        key_id: &str,
    ) -> Result<Revocation, StoreError> {
        let key = match self.keys.get_key(key_id).await? {
            Some(key) if key.organization_id == revoker.organization_id => key,
            _ => return Ok(Revocation::NotFound),
        };

        if !revoker.covers_scope(&key.allowed_site_ids) {
            warn!(
                key_id = %key_id,
                revoker_key_id = %revoker.key_id,
                "api_key_revoke_out_of_scope"
            );
            return Ok(Revocation::OutOfScope);
        }

        self.keys.set_key_active(key_id, false).await?;
        info!(
            key_id = %key_id,
            organization_id = %revoker.organization_id,
            revoker_key_id = %revoker.key_id,
            "api_key_revoked"
        );
        Ok(Revocation::Revoked)
    }
}

/// Result of a revocation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revocation {
    Revoked,
    NotFound,
    OutOfScope,
}

/// Pull the token out of `Bearer <token>`.
fn extract_bearer(header: Option<&str>) -> Result<&str, AuthError> {
    let header = header.map(str::trim).filter(|h| !h.is_empty());
    let header = header.ok_or(AuthError::MissingHeader)?;

    let (scheme, token) = header.split_once(' ').ok_or(AuthError::InvalidFormat)?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidFormat);
    }

    Ok(token.trim())
}

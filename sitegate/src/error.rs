//! Error types shared across the gateway.
//!
//! Each concern gets its own enum so callers can match on exactly the
//! failures they are able to handle:
//! - [`AuthError`]: credential and quota failures, each with a stable code
//! - [`AccessDenied`]: site-level authorization denials
//! - [`ValidationError`]: rejected registrations and event names
//! - [`StoreError`]: persistence failures

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors returned by the storage layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate record: {0}")]
    Conflict(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Credential and quota failures surfaced to API callers.
///
/// `MissingHeader`, `InvalidFormat` and `InvalidKeyFormat` describe a caller
/// bug; the remaining variants describe a bad or exhausted credential.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing Authorization header")]
    MissingHeader,

    #[error("Authorization header must use the Bearer scheme")]
    InvalidFormat,

    #[error("API key is too short")]
    InvalidKeyFormat,

    #[error("invalid API key")]
    InvalidKey,

    #[error("API key expired")]
    KeyExpired,

    #[error("rate limit exceeded, window resets at {reset_at}")]
    RateLimitExceeded { reset_at: DateTime<Utc> },

    #[error("authentication backend unavailable")]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::MissingHeader => "MISSING_AUTH_HEADER",
            AuthError::InvalidFormat => "INVALID_AUTH_FORMAT",
            AuthError::InvalidKeyFormat => "INVALID_KEY_FORMAT",
            AuthError::InvalidKey => "INVALID_KEY",
            AuthError::KeyExpired => "KEY_EXPIRED",
            AuthError::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            AuthError::Store(_) => "INTERNAL_ERROR",
        }
    }
}

/// Reasons a resolved caller may not act on a site.
///
/// The reasons are kept apart for logging, but [`AccessDenied::code`] is the
/// same for all of them so a caller cannot learn which sites exist in other
/// organizations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccessDenied {
    #[error("site {0} is not in the key's allowed sites")]
    NotAllowed(String),

    #[error("site {0} not found")]
    SiteNotFound(String),

    #[error("site {0} belongs to another organization")]
    WrongOrganization(String),
}

impl AccessDenied {
    /// Public category code, identical for every reason.
    pub fn code(&self) -> &'static str {
        "SITE_ACCESS_DENIED"
    }

    /// Internal reason label for structured logs.
    pub fn reason(&self) -> &'static str {
        match self {
            AccessDenied::NotAllowed(_) => "not_in_allowed_sites",
            AccessDenied::SiteNotFound(_) => "site_not_found",
            AccessDenied::WrongOrganization(_) => "wrong_organization",
        }
    }
}

/// Rejected input for key, site and webhook registration and event dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown event name: {0}")]
    UnknownEvent(String),

    #[error("webhook url is invalid: {0}")]
    InvalidUrl(String),

    #[error("webhook url must use https")]
    InsecureUrl,

    #[error("webhook must subscribe to at least one event")]
    NoEvents,

    #[error("retry delay must be greater than zero")]
    InvalidRetryDelay,

    #[error("invalid custom header {0}")]
    InvalidHeader(String),

    #[error("custom header {0} is reserved")]
    ReservedHeader(String),

    #[error("at least one permission is required")]
    NoPermissions,

    #[error("site id must not be empty")]
    EmptySiteId,
}

//! Mapping of gateway errors onto HTTP responses.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::error;

use crate::error::{AccessDenied, AuthError, StoreError, ValidationError};
use crate::keys::Permission;

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_at: Option<DateTime<Utc>>,
}

/// Anything a handler can fail with.
#[derive(Debug)]
pub enum ApiError {
    Auth(AuthError),
    Access(AccessDenied),
    MissingPermission(Permission),
    /// A key may not grant or revoke more site scope than the caller holds.
    ScopeExceeded,
    Validation(ValidationError),
    NotFound(&'static str),
    Conflict(String),
    Internal(String),
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        ApiError::Auth(e)
    }
}

impl From<AccessDenied> for ApiError {
    fn from(e: AccessDenied) -> Self {
        ApiError::Access(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Validation(e)
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(what) => ApiError::Conflict(what),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Auth(AuthError::RateLimitExceeded { .. }) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Auth(AuthError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::Access(_) | ApiError::MissingPermission(_) | ApiError::ScopeExceeded => {
                StatusCode::FORBIDDEN
            }
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Auth(e) => e.code(),
            ApiError::Access(e) => e.code(),
            ApiError::MissingPermission(_) => "INSUFFICIENT_PERMISSION",
            ApiError::ScopeExceeded => "KEY_SCOPE_EXCEEDED",
            ApiError::Validation(_) => "VALIDATION_FAILED",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn message(&self) -> String {
        match self {
            // The public message never names the reason.
            ApiError::Access(_) => "access to this site is denied".to_string(),
            ApiError::Auth(AuthError::Store(_)) | ApiError::Internal(_) => {
                "internal error".to_string()
            }
            ApiError::Auth(e) => e.to_string(),
            ApiError::MissingPermission(p) => format!("{:?} permission required", p).to_lowercase(),
            ApiError::ScopeExceeded => "key scope exceeds the caller's allowed sites".to_string(),
            ApiError::Validation(e) => e.to_string(),
            ApiError::NotFound(what) => format!("{} not found", what),
            ApiError::Conflict(what) => format!("{} already exists", what),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Internal(detail) => error!(error = %detail, "api_internal_error"),
            ApiError::Auth(AuthError::Store(e)) => error!(error = %e, "api_auth_backend_error"),
            _ => {}
        }

        let reset_at = match &self {
            ApiError::Auth(AuthError::RateLimitExceeded { reset_at }) => Some(*reset_at),
            _ => None,
        };

        let body = ErrorResponse {
            error: self.code(),
            message: self.message(),
            reset_at,
        };
        let mut response = (self.status(), Json(body)).into_response();

        if let Some(reset_at) = reset_at {
            let wait = (reset_at - Utc::now()).num_seconds().max(0);
            if let Ok(value) = HeaderValue::from_str(&wait.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}

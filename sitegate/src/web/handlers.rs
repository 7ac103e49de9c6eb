//! API endpoint handlers.
//!
//! Every `/api/v1` handler takes a [`Caller`], so the bearer check and quota
//! charge happen before the body is looked at. Site-scoped handlers then run
//! the permission and site access checks before touching the registry.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AccessDenied, StoreError, ValidationError};
use crate::events::EventKind;
use crate::keys::{AuthContext, NewApiKey, Permission, Revocation};
use crate::web::auth::Caller;
use crate::web::error::ApiError;
use crate::web::AppState;
use crate::webhooks::{DeliveryAttempt, NewWebhook, WebhookSubscription, WebhookView};

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// API Keys
// =============================================================================

/// Issue a key in the caller's organization.
///
/// The new key's scope must fit inside the caller's: a site-restricted caller
/// cannot mint an unrestricted key, and every listed site must be reachable.
pub async fn create_key(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<NewApiKey>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require(Permission::Admin)?;
    request.validate()?;

    if !caller.0.covers_scope(&request.allowed_site_ids) {
        warn!(
            key_id = %caller.0.key_id,
            requested_sites = request.allowed_site_ids.len(),
            "api_key_scope_exceeded"
        );
        return Err(ApiError::ScopeExceeded);
    }

    for site_id in &request.allowed_site_ids {
        caller.authorize_site(&state, site_id, Permission::Admin).await?;
    }

    let issued = state
        .authenticator
        .issue_key(&caller.0.organization_id, request)
        .await?;

    Ok((StatusCode::CREATED, Json(issued)))
}

/// Revoke a key owned by the caller's organization.
pub async fn revoke_key(
    State(state): State<AppState>,
    caller: Caller,
    Path(key_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    caller.require(Permission::Admin)?;

    match state.authenticator.revoke_key(&caller.0, &key_id).await? {
        Revocation::Revoked => Ok(StatusCode::NO_CONTENT),
        Revocation::NotFound => Err(ApiError::NotFound("key")),
        Revocation::OutOfScope => Err(ApiError::ScopeExceeded),
    }
}

// =============================================================================
// Sites
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct NewSite {
    pub site_id: String,
}

#[derive(Debug, Serialize)]
pub struct SiteResponse {
    pub site_id: String,
    pub organization_id: String,
}

/// Register a site under the caller's organization.
///
/// An id held by another organization is denied exactly like any other
/// foreign site; only the caller's own existing site yields a conflict.
pub async fn register_site(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<NewSite>,
) -> Result<impl IntoResponse, ApiError> {
    caller.require(Permission::Write)?;

    let site_id = request.site_id.trim();
    if site_id.is_empty() {
        return Err(ValidationError::EmptySiteId.into());
    }

    let auth = &caller.0;
    if !auth.allowed_site_ids.is_empty() && !auth.allowed_site_ids.iter().any(|s| s == site_id) {
        return Err(site_denied(auth, AccessDenied::NotAllowed(site_id.to_string())));
    }

    if let Some(owner) = state.sites.site_owner(site_id).await? {
        return Err(existing_site(auth, site_id, &owner));
    }

    match state.sites.register_site(site_id, &auth.organization_id).await {
        Ok(()) => {}
        // Lost a race with a concurrent registration.
        Err(StoreError::Conflict(_)) => {
            let owner = state.sites.site_owner(site_id).await?.unwrap_or_default();
            return Err(existing_site(auth, site_id, &owner));
        }
        Err(e) => return Err(e.into()),
    }

    info!(
        site_id = %site_id,
        organization_id = %auth.organization_id,
        "site_registered"
    );

    Ok((
        StatusCode::CREATED,
        Json(SiteResponse {
            site_id: site_id.to_string(),
            organization_id: auth.organization_id.clone(),
        }),
    ))
}

fn existing_site(auth: &AuthContext, site_id: &str, owner: &str) -> ApiError {
    if owner == auth.organization_id {
        ApiError::Conflict(format!("site {}", site_id))
    } else {
        site_denied(auth, AccessDenied::WrongOrganization(site_id.to_string()))
    }
}

fn site_denied(auth: &AuthContext, denied: AccessDenied) -> ApiError {
    warn!(
        key_id = %auth.key_id,
        organization_id = %auth.organization_id,
        reason = denied.reason(),
        "site_registration_denied"
    );
    denied.into()
}

// =============================================================================
// Webhooks
// =============================================================================

/// Creation response: the view plus the secret, shown this one time.
#[derive(Serialize)]
pub struct CreatedWebhook {
    #[serde(flatten)]
    pub webhook: WebhookView,
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct WebhookPatch {
    pub is_active: bool,
}

pub async fn list_webhooks(
    State(state): State<AppState>,
    caller: Caller,
    Path(site_id): Path<String>,
) -> Result<Json<Vec<WebhookView>>, ApiError> {
    caller.authorize_site(&state, &site_id, Permission::Read).await?;

    let webhooks = state.webhooks.list_for_site(&site_id).await?;
    Ok(Json(webhooks.iter().map(WebhookView::from).collect()))
}

pub async fn create_webhook(
    State(state): State<AppState>,
    caller: Caller,
    Path(site_id): Path<String>,
    Json(request): Json<NewWebhook>,
) -> Result<impl IntoResponse, ApiError> {
    caller.authorize_site(&state, &site_id, Permission::Write).await?;

    let webhook = request.into_subscription(&site_id)?;
    let created = CreatedWebhook {
        webhook: WebhookView::from(&webhook),
        secret: webhook.secret.clone(),
    };
    state.webhooks.insert_webhook(webhook).await?;

    info!(
        webhook_id = %created.webhook.id,
        site_id = %site_id,
        event_count = created.webhook.events.len(),
        "webhook_registered"
    );

    Ok((StatusCode::CREATED, Json(created)))
}

/// Enable or disable a subscription.
pub async fn update_webhook(
    State(state): State<AppState>,
    caller: Caller,
    Path((site_id, webhook_id)): Path<(String, String)>,
    Json(patch): Json<WebhookPatch>,
) -> Result<Json<WebhookView>, ApiError> {
    caller.authorize_site(&state, &site_id, Permission::Write).await?;
    load_webhook(&state, &site_id, &webhook_id).await?;

    let updated = state
        .webhooks
        .set_webhook_active(&webhook_id, patch.is_active)
        .await?
        .ok_or(ApiError::NotFound("webhook"))?;

    info!(webhook_id = %webhook_id, is_active = patch.is_active, "webhook_toggled");
    Ok(Json(WebhookView::from(&updated)))
}

/// Remove a subscription. Its delivery log stays.
pub async fn delete_webhook(
    State(state): State<AppState>,
    caller: Caller,
    Path((site_id, webhook_id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    caller.authorize_site(&state, &site_id, Permission::Delete).await?;
    load_webhook(&state, &site_id, &webhook_id).await?;

    state.webhooks.delete_webhook(&webhook_id).await?;
    info!(webhook_id = %webhook_id, site_id = %site_id, "webhook_deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    caller: Caller,
    Path((site_id, webhook_id)): Path<(String, String)>,
) -> Result<Json<Vec<DeliveryAttempt>>, ApiError> {
    caller.authorize_site(&state, &site_id, Permission::Read).await?;
    load_webhook(&state, &site_id, &webhook_id).await?;

    Ok(Json(state.ledger.attempts_for_webhook(&webhook_id).await?))
}

/// A webhook of another site is reported as missing.
async fn load_webhook(
    state: &AppState,
    site_id: &str,
    webhook_id: &str,
) -> Result<WebhookSubscription, ApiError> {
    match state.webhooks.get_webhook(webhook_id).await? {
        Some(webhook) if webhook.site_id == site_id => Ok(webhook),
        _ => Err(ApiError::NotFound("webhook")),
    }
}

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct EventRequest {
    pub event: String,
    #[serde(default = "empty_object")]
    pub data: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

#[derive(Serialize)]
pub struct EventAccepted {
    pub status: &'static str,
    pub event: EventKind,
}

/// Announce a domain event. Delivery happens in the background.
pub async fn trigger_event(
    State(state): State<AppState>,
    caller: Caller,
    Path(site_id): Path<String>,
    Json(request): Json<EventRequest>,
) -> Result<impl IntoResponse, ApiError> {
    caller.authorize_site(&state, &site_id, Permission::Write).await?;

    let event: EventKind = request.event.parse()?;
    drop(state.dispatcher.dispatch(&site_id, event, request.data));

    info!(site_id = %site_id, event = %event, key_id = %caller.0.key_id, "event_accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(EventAccepted {
            status: "accepted",
            event,
        }),
    ))
}

//! Webhook subscription records and registration input.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use rand::rngs::OsRng;
use rand::RngCore;
use reqwest::header::{HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::error::ValidationError;
use crate::events::EventKind;

/// Headers set by the delivery worker or the HTTP client itself, plus
/// hop-by-hop headers. Custom headers may not use these names.
pub const RESERVED_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "transfer-encoding",
    "host",
    "connection",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "upgrade",
    "x-signature",
    "x-event",
    "x-timestamp",
    "x-retry",
];

/// Leading marker on generated signing secrets.
pub const SECRET_MARKER: &str = "whsec_";

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_DELAY_SECONDS: u32 = 60;

/// One external endpoint subscribed to a site's domain events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookSubscription {
    pub id: String,
    pub site_id: String,
    pub url: String,
    /// Symmetric HMAC key; exposed to the owner only at creation time.
    pub secret: String,
    pub events: BTreeSet<EventKind>,
    pub custom_headers: BTreeMap<String, String>,
    pub max_retries: u32,
    pub retry_delay_seconds: u32,
    pub is_active: bool,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<u16>,
    pub created_at: DateTime<Utc>,
}

impl WebhookSubscription {
    pub fn subscribes_to(&self, event: EventKind) -> bool {
        self.events.contains(&event)
    }

    /// Whether another attempt may follow a failed `attempt_number`.
    ///
    /// A subscription gets the initial attempt plus `max_retries` retries.
    pub fn has_retries_left(&self, attempt_number: u32) -> bool {
        attempt_number <= self.max_retries
    }

    /// Linear backoff after a failed `attempt_number`.
    pub fn retry_delay(&self, attempt_number: u32) -> Duration {
        Duration::seconds(i64::from(self.retry_delay_seconds) * i64::from(attempt_number))
    }
}

/// Registration request for a new subscription.
#[derive(Debug, Clone, Deserialize)]
pub struct NewWebhook {
    pub url: String,
    pub events: Vec<EventKind>,
    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_seconds")]
    pub retry_delay_seconds: u32,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_retry_delay_seconds() -> u32 {
    DEFAULT_RETRY_DELAY_SECONDS
}

impl NewWebhook {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = Url::parse(&self.url).map_err(|e| ValidationError::InvalidUrl(e.to_string()))?;
        if url.scheme() != "https" {
            return Err(ValidationError::InsecureUrl);
        }
        if url.host_str().map(str::is_empty).unwrap_or(true) {
            return Err(ValidationError::InvalidUrl("missing host".to_string()));
        }

        if self.events.is_empty() {
            return Err(ValidationError::NoEvents);
        }

        if self.retry_delay_seconds == 0 {
            return Err(ValidationError::InvalidRetryDelay);
        }

        for (name, value) in &self.custom_headers {
            if HeaderName::from_bytes(name.as_bytes()).is_err()
                || HeaderValue::from_str(value).is_err()
            {
                return Err(ValidationError::InvalidHeader(name.clone()));
            }
            if RESERVED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
                return Err(ValidationError::ReservedHeader(name.clone()));
            }
        }

        Ok(())
    }

    /// Validate and build an active subscription with a fresh secret.
    pub fn into_subscription(self, site_id: &str) -> Result<WebhookSubscription, ValidationError> {
        self.validate()?;

        Ok(WebhookSubscription {
            id: Uuid::new_v4().to_string(),
            site_id: site_id.to_string(),
            url: self.url,
            secret: generate_webhook_secret(),
            events: self.events.into_iter().collect(),
            custom_headers: self.custom_headers,
            max_retries: self.max_retries,
            retry_delay_seconds: self.retry_delay_seconds,
            is_active: true,
            success_count: 0,
            failure_count: 0,
            last_triggered_at: None,
            last_status_code: None,
            created_at: Utc::now(),
        })
    }
}

/// Generate a signing secret: `whsec_` followed by 64 hex characters.
pub fn generate_webhook_secret() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", SECRET_MARKER, hex::encode(bytes))
}

/// Subscription as shown after creation: everything except the secret.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookView {
    pub id: String,
    pub site_id: String,
    pub url: String,
    pub events: BTreeSet<EventKind>,
    pub custom_headers: BTreeMap<String, String>,
    pub max_retries: u32,
    pub retry_delay_seconds: u32,
    pub is_active: bool,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub last_status_code: Option<u16>,
    pub created_at: DateTime<Utc>,
}

impl From<&WebhookSubscription> for WebhookView {
    fn from(webhook: &WebhookSubscription) -> Self {
        Self {
            id: webhook.id.clone(),
            site_id: webhook.site_id.clone(),
            url: webhook.url.clone(),
            events: webhook.events.clone(),
            custom_headers: webhook.custom_headers.clone(),
            max_retries: webhook.max_retries,
            retry_delay_seconds: webhook.retry_delay_seconds,
            is_active: webhook.is_active,
            success_count: webhook.success_count,
            failure_count: webhook.failure_count,
            last_triggered_at: webhook.last_triggered_at,
            last_status_code: webhook.last_status_code,
            created_at: webhook.created_at,
        }
    }
}

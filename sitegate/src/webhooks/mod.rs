//! Outbound webhooks.
//!
//! This module provides:
//! - Subscription records, registration validation and signing secrets
//! - HMAC-SHA256 payload signing
//! - The [`DeliveryWorker`], which sends one signed attempt and logs it
//! - The [`Dispatcher`], which fans an event out to subscribers
//! - The [`RetryScheduler`], which replays failed attempts from the queue

pub mod delivery;
pub mod dispatcher;
pub mod ledger;
pub mod model;
pub mod occurrence;
pub mod retry;
pub mod signature;

pub use delivery::{build_headers, AttemptReport, DeliveryWorker};
pub use dispatcher::{DispatchSummary, Dispatcher};
pub use ledger::{DeliveryAttempt, DeliveryOutcome, PendingRetry};
pub use model::{
    generate_webhook_secret, NewWebhook, WebhookSubscription, WebhookView, RESERVED_HEADERS,
};
pub use occurrence::Occurrence;
pub use retry::{RetryScheduler, RetrySettings};
pub use signature::{sign_payload, verify_signature};

/// Active subscription to `entry.created` that skips URL validation, so
/// tests can point it at a plain-http mock server.
#[cfg(test)]
pub(crate) fn test_subscription(
    site_id: &str,
    url: &str,
    max_retries: u32,
    retry_delay_seconds: u32,
) -> WebhookSubscription {
    WebhookSubscription {
        id: uuid::Uuid::new_v4().to_string(),
        site_id: site_id.to_string(),
        url: url.to_string(),
        secret: generate_webhook_secret(),
        events: [crate::events::EventKind::EntryCreated].into_iter().collect(),
        custom_headers: Default::default(),
        max_retries,
        retry_delay_seconds,
        is_active: true,
        success_count: 0,
        failure_count: 0,
        last_triggered_at: None,
        last_status_code: None,
        created_at: chrono::Utc::now(),
    }
}

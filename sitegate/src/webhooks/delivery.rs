//! Single signed delivery attempts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::store::{DeliveryLedger, RetryQueue, WebhookStore};
use crate::webhooks::signature::sign_payload;
use crate::webhooks::{DeliveryAttempt, DeliveryOutcome, Occurrence, PendingRetry, WebhookSubscription};

/// Longest slice of a failing response body kept in the ledger.
const MAX_ERROR_BODY_BYTES: usize = 512;

/// What one attempt did, returned to the dispatcher and retry scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptReport {
    pub webhook_id: String,
    pub attempt_number: u32,
    pub success: bool,
    pub status_code: Option<u16>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Sends one signed POST, records the result and arms the next retry.
pub struct DeliveryWorker {
    client: Client,
    webhooks: Arc<dyn WebhookStore>,
    ledger: Arc<dyn DeliveryLedger>,
    retries: Arc<dyn RetryQueue>,
    timeout: Duration,
}

impl DeliveryWorker {
    pub fn new(
        webhooks: Arc<dyn WebhookStore>,
        ledger: Arc<dyn DeliveryLedger>,
        retries: Arc<dyn RetryQueue>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(20)
            .redirect(reqwest::redirect::Policy::none())
            .user_agent(concat!("sitegate-webhooks/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            webhooks,
            ledger,
            retries,
            timeout,
        })
    }

    /// Run attempt `attempt_number` of `occurrence` against `webhook`.
    ///
    /// Never fails: transport and storage errors are logged and folded into
    /// the report so one bad endpoint cannot disturb other deliveries.
    pub async fn deliver(
        &self,
        webhook: &WebhookSubscription,
        occurrence: &Occurrence,
        attempt_number: u32,
    ) -> AttemptReport {
        let headers = build_headers(webhook, occurrence, attempt_number);

        info!(
            webhook_id = %webhook.id,
            occurrence_id = %occurrence.id,
            event = %occurrence.event,
            attempt_number = attempt_number,
            "webhook_delivery_starting"
        );

        let started = Instant::now();
        let result = self
            .client
            .post(&webhook.url)
            .headers(headers)
            .timeout(self.timeout)
            .body(occurrence.body.clone())
            .send()
            .await;

        let (success, status_code, error_message) = match result {
            Ok(resp) => {
                let status = resp.status();
                if status.is_success() {
                    (true, Some(status.as_u16()), None)
                } else {
                    let body = error_body_excerpt(resp).await;
                    let message = if body.is_empty() {
                        format!("HTTP {}", status.as_u16())
                    } else {
                        format!("HTTP {}: {}", status.as_u16(), body)
                    };
                    (false, Some(status.as_u16()), Some(message))
                }
            }
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("Request timeout after {}ms", self.timeout.as_millis())
                } else if e.is_connect() {
                    format!("Connection failed: {}", e)
                } else {
                    format!("Request error: {}", e)
                };
                (false, None, Some(message))
            }
        };
        let response_time_ms = started.elapsed().as_millis() as u64;
        let attempted_at = Utc::now();

        let next_retry_at = if !success && webhook.has_retries_left(attempt_number) {
            Some(attempted_at + webhook.retry_delay(attempt_number))
        } else {
            None
        };

        if success {
            info!(
                webhook_id = %webhook.id,
                occurrence_id = %occurrence.id,
                attempt_number = attempt_number,
                status_code = ?status_code,
                response_time_ms = response_time_ms,
                "webhook_delivery_succeeded"
            );
        } else {
            warn!(
                webhook_id = %webhook.id,
                occurrence_id = %occurrence.id,
                attempt_number = attempt_number,
                status_code = ?status_code,
                response_time_ms = response_time_ms,
                error = ?error_message,
                next_retry_at = ?next_retry_at,
                "webhook_delivery_failed"
            );
        }

        let attempt = DeliveryAttempt {
            id: Uuid::new_v4().to_string(),
            webhook_id: webhook.id.clone(),
            occurrence_id: occurrence.id.clone(),
            event: occurrence.event,
            payload: occurrence.payload(),
            attempt_number,
            status_code,
            response_time_ms,
            success,
            error_message,
            attempted_at,
            next_retry_at,
        };
        if let Err(e) = self.ledger.append_attempt(attempt).await {
            error!(webhook_id = %webhook.id, error = %e, "webhook_attempt_log_failed");
        }

        let outcome = DeliveryOutcome {
            success,
            status_code,
            at: attempted_at,
        };
        if let Err(e) = self.webhooks.record_outcome(&webhook.id, &outcome).await {
            error!(webhook_id = %webhook.id, error = %e, "webhook_stats_update_failed");
        }

        match next_retry_at {
            Some(due_at) => {
                let retry = PendingRetry {
                    id: Uuid::new_v4().to_string(),
                    webhook_id: webhook.id.clone(),
                    occurrence: occurrence.clone(),
                    attempt_number: attempt_number + 1,
                    due_at,
                    claimed_until: None,
                };
                if let Err(e) = self.retries.schedule(retry).await {
                    error!(webhook_id = %webhook.id, error = %e, "webhook_retry_schedule_failed");
                }
            }
            None if !success => {
                warn!(
                    webhook_id = %webhook.id,
                    occurrence_id = %occurrence.id,
                    attempts = attempt_number,
                    "webhook_delivery_exhausted"
                );
            }
            None => {}
        }

        AttemptReport {
            webhook_id: webhook.id.clone(),
            attempt_number,
            success,
            status_code,
            next_retry_at,
        }
    }
}

/// Headers for one attempt.
///
/// Custom headers go in first; the signing headers are inserted afterwards
/// and replace any custom header with the same name.
pub fn build_headers(
    webhook: &WebhookSubscription,
    occurrence: &Occurrence,
    attempt_number: u32,
) -> HeaderMap {
    let mut headers = HeaderMap::new();

    for (name, value) in &webhook.custom_headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(webhook_id = %webhook.id, header = %name, "webhook_custom_header_skipped"),
        }
    }

    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    if let Ok(signature) = HeaderValue::from_str(&sign_payload(&webhook.secret, &occurrence.body)) {
        headers.insert(HeaderName::from_static("x-signature"), signature);
    }
    headers.insert(
        HeaderName::from_static("x-event"),
        HeaderValue::from_static(occurrence.event.as_str()),
    );
    if let Ok(timestamp) = HeaderValue::from_str(&occurrence.timestamp_header()) {
        headers.insert(HeaderName::from_static("x-timestamp"), timestamp);
    }
    if attempt_number > 1 {
        headers.insert(
            HeaderName::from_static("x-retry"),
            HeaderValue::from(attempt_number),
        );
    }

    headers
}

/// Leading part of a failure response body.
///
/// Reads chunk by chunk and drops the connection once enough is buffered, so
/// an endpoint streaming a huge body costs at most one extra chunk.
async fn error_body_excerpt(mut resp: reqwest::Response) -> String {
    let mut buf = Vec::new();
    while buf.len() < MAX_ERROR_BODY_BYTES {
        match resp.chunk().await {
            Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
            Ok(None) | Err(_) => break,
        }
    }
    buf.truncate(MAX_ERROR_BODY_BYTES);
    String::from_utf8_lossy(&buf).into_owned()
}
